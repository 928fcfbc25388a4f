use chrono::{DateTime, Utc};

/// Source of wall-clock time for the rotation and visit windows.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for tests.
#[cfg(test)]
#[derive(Debug)]
pub struct MockClock {
    now: parking_lot::RwLock<DateTime<Utc>>,
}

#[cfg(test)]
impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

#[cfg(test)]
impl MockClock {
    pub fn with_time(time: DateTime<Utc>) -> Self {
        Self {
            now: parking_lot::RwLock::new(time),
        }
    }

    pub fn advance(&self, delta: chrono::TimeDelta) {
        let mut now = self.now.write();
        *now += delta;
    }
}
