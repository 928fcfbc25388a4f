//! Cookie-based visitor counting.
//!
//! Each browser gets an opaque identifier that lives in a long-lived cookie.
//! A visit is recorded at most once per identifier per [`VISIT_WINDOW_MINUTES`].
//! The identifiers are analytics keys only and carry no authority.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::store::{StoreResult, VideoStore};

pub const VISITOR_COOKIE: &str = "visitor_id";
pub const VISIT_WINDOW_MINUTES: i64 = 30;
pub const COOKIE_MAX_AGE_DAYS: i64 = 365;

const VISITOR_ID_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visitor {
    Returning(String),
    /// Freshly minted; the caller still has to hand the cookie to the browser.
    New(String),
}

impl Visitor {
    pub fn id(&self) -> &str {
        match self {
            Visitor::Returning(id) | Visitor::New(id) => id,
        }
    }
}

#[derive(Debug, Default)]
pub struct VisitorTracker {
    minted: AtomicU64,
}

impl VisitorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuses the identifier from the cookie when there is one, otherwise
    /// mints a new one seeded from `now`.
    pub fn identify(&self, existing: Option<&str>, now: DateTime<Utc>) -> Visitor {
        match existing.map(str::trim).filter(|value| !value.is_empty()) {
            Some(id) => Visitor::Returning(id.to_owned()),
            None => Visitor::New(self.mint(now)),
        }
    }

    /// Time-seeded identifier. The process-local counter keeps two mints in
    /// the same nanosecond apart.
    fn mint(&self, now: DateTime<Utc>) -> String {
        let seed = now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp());
        let sequence = self.minted.fetch_add(1, Ordering::Relaxed);

        let mut hasher = blake3::Hasher::new();
        hasher.update(&seed.to_le_bytes());
        hasher.update(&sequence.to_le_bytes());
        hasher.update(&std::process::id().to_le_bytes());
        hasher.finalize().to_hex()[..VISITOR_ID_LEN].to_owned()
    }

    /// Records a visit unless the visitor was already counted within the
    /// window. Returns whether a row was written.
    ///
    /// The lookup and the insert are not atomic, so two concurrent requests
    /// from the same browser can both be counted.
    pub fn track(
        &self,
        store: &VideoStore,
        visitor_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        if let Some(last) = store.last_visit(visitor_id)?
            && now - last < TimeDelta::minutes(VISIT_WINDOW_MINUTES)
        {
            debug!(visitor_id, %last, "visit already counted in this window");
            return Ok(false);
        }

        store.record_visit(visitor_id, now)?;
        Ok(true)
    }
}
