//! "Video of the day" rotation.
//!
//! The rotation index names the row shown today. It moves forward by one the
//! first time a request arrives on a new UTC day, so an idle day does not
//! advance it. The state lives in memory only and starts over on restart.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::VideoRecord;
use crate::store::{StoreError, VideoStore};

/// Index before the first request. The first request rolls it to row 1.
pub const SEED_INDEX: i64 = 0;

pub const EXCEEDED_MESSAGE: &str = "No more videos available";

#[derive(Debug, Clone, PartialEq)]
pub enum Pick {
    Video(VideoRecord),
    /// The requested position lies past the last stored video.
    Exceeded,
}

#[derive(Debug, Error)]
pub enum PickError {
    #[error("video {0} is missing from the store")]
    Missing(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub struct DailyPicker {
    index: AtomicI64,
    last_rotation: Mutex<Option<NaiveDate>>,
}

impl Default for DailyPicker {
    fn default() -> Self {
        Self::new()
    }
}

impl DailyPicker {
    pub fn new() -> Self {
        Self::with_state(SEED_INDEX, None)
    }

    pub fn with_state(index: i64, last_rotation: Option<NaiveDate>) -> Self {
        Self {
            index: AtomicI64::new(index),
            last_rotation: Mutex::new(last_rotation),
        }
    }

    pub fn index(&self) -> i64 {
        self.index.load(Ordering::SeqCst)
    }

    pub fn last_rotation(&self) -> Option<NaiveDate> {
        *self.last_rotation.lock()
    }

    /// Advances the index when `today` differs from the last rotation date and
    /// returns the index to use for this request.
    ///
    /// The date comparison and the increment are separate steps. Two requests
    /// that both observe the old date around midnight will both increment, and
    /// a request can read the index just before or just after another one
    /// bumps it. The rotation tolerates that; it is not fixed here.
    pub fn roll(&self, today: NaiveDate) -> i64 {
        let last = *self.last_rotation.lock();
        if last != Some(today) {
            *self.last_rotation.lock() = Some(today);
            let index = self.index.fetch_add(1, Ordering::SeqCst) + 1;
            info!(%today, index, "rotated daily video");
        }
        self.index()
    }

    /// Resolves today's video shifted by `offset`.
    ///
    /// Positions past the end produce [`Pick::Exceeded`]; positions at or
    /// below zero wrap around to the end of the table. When the index itself
    /// has drifted past the number of stored videos it restarts at row 1.
    pub fn resolve(
        &self,
        store: &VideoStore,
        offset: i64,
        now: DateTime<Utc>,
    ) -> Result<Pick, PickError> {
        let index = self.roll(now.date_naive());
        let target = index.saturating_add(offset);

        match store.get_by_row_id(target) {
            Ok(video) => return Ok(Pick::Video(video)),
            Err(StoreError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }

        let total = store.count()?;
        if index > total {
            debug!(index, total, "rotation index past the end, restarting at 1");
            self.index.store(1, Ordering::SeqCst);
            return Ok(Pick::Video(store.get_by_row_id(1)?));
        }
        if target > total {
            return Ok(Pick::Exceeded);
        }
        if target <= 0 && total > 0 {
            let wrapped = wrap_position(target, total);
            debug!(target, wrapped, total, "wrapping offset to the end of the table");
            return Ok(Pick::Video(store.get_by_row_id(wrapped)?));
        }

        Err(PickError::Missing(target))
    }
}

/// Maps any position onto `1..=total`, counting backwards from the end for
/// zero and negative positions (`0 -> total`, `-1 -> total - 1`).
fn wrap_position(target: i64, total: i64) -> i64 {
    (target - 1).rem_euclid(total) + 1
}
