//! SQLite persistence for ingested videos and visitor analytics.
//!
//! Two tables live in the database: `videos`, filled by the ingestor, and
//! `visitors`, one row per counted visit. Both are created on open when they
//! do not exist yet. Every operation is synchronous; async callers are
//! expected to hop onto a blocking thread first.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;
use tracing::{debug, error};

use crate::models::{DailyVisits, HalfHourVisits, NewVideo, VideoRecord};

/// How long the health probe waits for the connection before reporting down.
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

const HEAVY_WAIT_COUNT: u64 = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no video with row id {0}")]
    NotFound(i64),
    #[error("video {0} is already stored")]
    DuplicateKey(String),
    #[error("creating database directory {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("stored timestamp {value:?} is not RFC 3339: {source}")]
    Corrupt {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Key/value snapshot returned by [`VideoStore::health`].
pub type HealthReport = BTreeMap<String, String>;

/// Owns the single SQLite connection used by the process.
///
/// The connection sits behind a mutex, so callers never share a transaction
/// across calls. Time spent waiting on that mutex is recorded and surfaced by
/// the health probe in place of connection pool statistics.
#[derive(Debug)]
pub struct VideoStore {
    conn: Mutex<Connection>,
    location: String,
    wait_count: AtomicU64,
    wait_nanos: AtomicU64,
}

impl VideoStore {
    /// Opens (and if necessary creates) the database file and its tables. WAL
    /// mode keeps readers from blocking the ingestor's writes.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::from_connection(conn, path.display().to_string())
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, ":memory:".to_owned())
    }

    fn from_connection(conn: Connection, location: String) -> StoreResult<Self> {
        let mut store = Self {
            conn: Mutex::new(conn),
            location,
            wait_count: AtomicU64::new(0),
            wait_nanos: AtomicU64::new(0),
        };
        store.ensure_tables()?;
        debug!(location = %store.location, "video store ready");
        Ok(store)
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Creates both tables inside one transaction so a failure leaves the
    /// file untouched.
    fn ensure_tables(&mut self) -> StoreResult<()> {
        let conn = self.conn.get_mut();
        let tx = conn.transaction()?;

        tx.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS videos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                published_at TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                thumbnail_url TEXT NOT NULL,
                video_id TEXT NOT NULL UNIQUE,
                owner_channel_title TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS visitors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                visitor_id TEXT NOT NULL,
                visited_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_visitors_visitor ON visitors(visitor_id, visited_at);
            "#,
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Grabs the connection, counting the call as a wait when another caller
    /// already holds it.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        if let Some(guard) = self.conn.try_lock() {
            return guard;
        }
        let started = Instant::now();
        let guard = self.conn.lock();
        let waited = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.wait_count.fetch_add(1, Ordering::Relaxed);
        self.wait_nanos.fetch_add(waited, Ordering::Relaxed);
        guard
    }

    /// Inserts a new video and returns its row id. A second insert with the
    /// same upstream video id fails with [`StoreError::DuplicateKey`].
    pub fn insert(&self, video: &NewVideo) -> StoreResult<i64> {
        let conn = self.conn();
        let result = conn.execute(
            r#"
            INSERT INTO videos (
                published_at, title, description, thumbnail_url, video_id, owner_channel_title
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                video.published_at,
                video.title,
                video.description,
                video.thumbnail_url,
                video.video_id,
                video.channel_title,
            ],
        );

        match result {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::DuplicateKey(video.video_id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn get_by_row_id(&self, id: i64) -> StoreResult<VideoRecord> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT id, published_at, title, description, thumbnail_url, video_id,
                   owner_channel_title
            FROM videos
            WHERE id = ?1
            "#,
        )?;

        stmt.query_row([id], row_to_video)
            .optional()?
            .ok_or(StoreError::NotFound(id))
    }

    /// Every stored video in insertion order.
    pub fn get_all(&self) -> StoreResult<Vec<VideoRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT id, published_at, title, description, thumbnail_url, video_id,
                   owner_channel_title
            FROM videos
            ORDER BY id ASC
            "#,
        )?;

        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(row_to_video(row)?);
        }
        Ok(records)
    }

    pub fn count(&self) -> StoreResult<i64> {
        let conn = self.conn();
        let total = conn.query_row("SELECT COUNT(*) FROM videos", [], |row| row.get(0))?;
        Ok(total)
    }

    pub fn record_visit(&self, visitor_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO visitors (visitor_id, visited_at) VALUES (?1, ?2)",
            params![visitor_id, format_timestamp(at)],
        )?;
        Ok(())
    }

    /// Most recent visit recorded for `visitor_id`, if any.
    pub fn last_visit(&self, visitor_id: &str) -> StoreResult<Option<DateTime<Utc>>> {
        let conn = self.conn();
        let raw: Option<String> = conn
            .query_row(
                r#"
                SELECT visited_at
                FROM visitors
                WHERE visitor_id = ?1
                ORDER BY visited_at DESC
                LIMIT 1
                "#,
                [visitor_id],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|value| parse_timestamp(&value)).transpose()
    }

    pub fn aggregate_visits_by_day(&self) -> StoreResult<Vec<DailyVisits>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT substr(visited_at, 1, 10) AS day, COUNT(*)
            FROM visitors
            GROUP BY day
            ORDER BY day ASC
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(DailyVisits {
                date: row.get(0)?,
                count: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Visits grouped into half-hour buckets. Timestamps are stored as
    /// `YYYY-MM-DDTHH:MM:SS.mmmZ`, so the bucket is the first 14 characters
    /// plus `00` or `30` depending on the minute.
    pub fn aggregate_visits_by_half_hour(&self) -> StoreResult<Vec<HalfHourVisits>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT substr(visited_at, 1, 14)
                       || CASE WHEN CAST(substr(visited_at, 15, 2) AS INTEGER) < 30
                               THEN '00' ELSE '30' END AS bucket,
                   COUNT(*)
            FROM visitors
            GROUP BY bucket
            ORDER BY bucket ASC
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(HalfHourVisits {
                bucket: row.get(0)?,
                count: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Pings the database and reports connection statistics. Never fails: an
    /// unreachable database is reported as `status: down`.
    pub fn health(&self) -> HealthReport {
        let mut stats = HealthReport::new();
        let in_use = self.conn.is_locked();

        match self.conn.try_lock_for(HEALTH_PROBE_TIMEOUT) {
            None => {
                error!(location = %self.location, "health probe timed out waiting for connection");
                stats.insert("status".into(), "down".into());
                stats.insert(
                    "error".into(),
                    format!("db down: no connection within {HEALTH_PROBE_TIMEOUT:?}"),
                );
            }
            Some(conn) => match conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)) {
                Ok(_) => {
                    stats.insert("status".into(), "up".into());
                    stats.insert("message".into(), "It's healthy".into());
                }
                Err(err) => {
                    error!(location = %self.location, %err, "health probe query failed");
                    stats.insert("status".into(), "down".into());
                    stats.insert("error".into(), format!("db down: {err}"));
                }
            },
        }

        let wait_count = self.wait_count.load(Ordering::Relaxed);
        let wait_duration = Duration::from_nanos(self.wait_nanos.load(Ordering::Relaxed));
        stats.insert("open_connections".into(), "1".into());
        stats.insert("in_use".into(), u8::from(in_use).to_string());
        stats.insert("idle".into(), u8::from(!in_use).to_string());
        stats.insert("wait_count".into(), wait_count.to_string());
        stats.insert("wait_duration".into(), format!("{wait_duration:?}"));

        if wait_count > HEAVY_WAIT_COUNT && stats.get("status").map(String::as_str) == Some("up") {
            stats.insert(
                "message".into(),
                "The database has a high number of wait events, indicating potential bottlenecks."
                    .into(),
            );
        }

        stats
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn row_to_video(row: &Row<'_>) -> rusqlite::Result<VideoRecord> {
    Ok(VideoRecord {
        id: row.get("id")?,
        published_at: row.get("published_at")?,
        title: row.get("title")?,
        description: row.get("description")?,
        thumbnail_url: row.get("thumbnail_url")?,
        video_id: row.get("video_id")?,
        channel_title: row.get("owner_channel_title")?,
    })
}

/// Visit timestamps are stored with fixed-width milliseconds and a `Z` suffix
/// so that string order matches time order.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| StoreError::Corrupt {
            value: value.to_owned(),
            source,
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    pub(crate) fn sample_video(video_id: &str) -> NewVideo {
        NewVideo {
            published_at: "2024-03-01T07:30:00Z".into(),
            title: format!("Session {video_id}"),
            description: "Gentle stretching".into(),
            thumbnail_url: format!("https://i.ytimg.com/vi/{video_id}/default.jpg"),
            video_id: video_id.into(),
            channel_title: "Yoga Channel".into(),
        }
    }

    pub(crate) fn store_with_videos(count: usize) -> VideoStore {
        let store = VideoStore::open_in_memory().unwrap();
        for n in 1..=count {
            store.insert(&sample_video(&format!("vid{n}"))).unwrap();
        }
        store
    }

    impl VideoStore {
        /// Locks the connection the way a long-running caller would.
        pub(crate) fn hold_connection(&self) -> MutexGuard<'_, Connection> {
            self.conn.lock()
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn open_creates_parent_directory_and_tables() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let path = temp.path().join("nested").join("videos.db");
        let store = VideoStore::open(&path)?;
        assert!(path.exists());
        assert_eq!(store.count()?, 0);
        drop(store);

        let reopened = VideoStore::open(&path)?;
        assert_eq!(reopened.count()?, 0);
        Ok(())
    }

    #[test]
    fn insert_assigns_sequential_row_ids() {
        let store = VideoStore::open_in_memory().unwrap();
        assert_eq!(store.insert(&sample_video("a")).unwrap(), 1);
        assert_eq!(store.insert(&sample_video("b")).unwrap(), 2);

        let second = store.get_by_row_id(2).unwrap();
        assert_eq!(second.video_id, "b");
        assert_eq!(second.title, "Session b");
    }

    #[test]
    fn duplicate_video_id_is_rejected() {
        let store = VideoStore::open_in_memory().unwrap();
        store.insert(&sample_video("a")).unwrap();
        let err = store.insert(&sample_video("a")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(ref id) if id == "a"));
        assert_eq!(store.count().unwrap(), 1);

        // A rejected insert must not burn a row id.
        assert_eq!(store.insert(&sample_video("b")).unwrap(), 2);
    }

    #[test]
    fn missing_row_is_not_found() {
        let store = store_with_videos(2);
        assert!(matches!(
            store.get_by_row_id(3),
            Err(StoreError::NotFound(3))
        ));
        assert!(matches!(
            store.get_by_row_id(0),
            Err(StoreError::NotFound(0))
        ));
    }

    #[test]
    fn count_matches_unique_inserts() {
        assert_eq!(VideoStore::open_in_memory().unwrap().count().unwrap(), 0);
        assert_eq!(store_with_videos(4).count().unwrap(), 4);
    }

    #[test]
    fn get_all_returns_rows_in_insert_order() {
        let store = store_with_videos(3);
        let ids: Vec<_> = store
            .get_all()
            .unwrap()
            .into_iter()
            .map(|video| video.video_id)
            .collect();
        assert_eq!(ids, ["vid1", "vid2", "vid3"]);
    }

    #[test]
    fn last_visit_returns_latest_timestamp() {
        let store = VideoStore::open_in_memory().unwrap();
        assert_eq!(store.last_visit("v1").unwrap(), None);

        store.record_visit("v1", at(9, 0)).unwrap();
        store.record_visit("v1", at(11, 15)).unwrap();
        store.record_visit("v2", at(12, 0)).unwrap();

        assert_eq!(store.last_visit("v1").unwrap(), Some(at(11, 15)));
    }

    #[test]
    fn visits_aggregate_by_day_and_half_hour() {
        let store = VideoStore::open_in_memory().unwrap();
        store.record_visit("a", at(9, 5)).unwrap();
        store.record_visit("b", at(9, 29)).unwrap();
        store.record_visit("c", at(9, 30)).unwrap();
        store
            .record_visit("a", Utc.with_ymd_and_hms(2024, 3, 2, 0, 45, 0).unwrap())
            .unwrap();

        assert_eq!(
            store.aggregate_visits_by_day().unwrap(),
            vec![
                DailyVisits {
                    date: "2024-03-01".into(),
                    count: 3
                },
                DailyVisits {
                    date: "2024-03-02".into(),
                    count: 1
                },
            ]
        );

        assert_eq!(
            store.aggregate_visits_by_half_hour().unwrap(),
            vec![
                HalfHourVisits {
                    bucket: "2024-03-01T09:00".into(),
                    count: 2
                },
                HalfHourVisits {
                    bucket: "2024-03-01T09:30".into(),
                    count: 1
                },
                HalfHourVisits {
                    bucket: "2024-03-02T00:30".into(),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn health_reports_up_with_stats() {
        let store = VideoStore::open_in_memory().unwrap();
        let report = store.health();
        assert_eq!(report["status"], "up");
        assert_eq!(report["open_connections"], "1");
        assert_eq!(report["wait_count"], "0");
    }

    #[test]
    fn health_reports_down_when_connection_stays_busy() {
        let store = VideoStore::open_in_memory().unwrap();
        let report = std::thread::scope(|scope| {
            let _held = store.hold_connection();
            scope.spawn(|| store.health()).join().unwrap()
        });
        assert_eq!(report["status"], "down");
        assert!(report["error"].contains("no connection within"));
        assert!(!report.contains_key("message"));
        assert_eq!(report["in_use"], "1");
        assert_eq!(report["open_connections"], "1");
    }

    #[test]
    fn visit_timestamps_keep_milliseconds() {
        let store = VideoStore::open_in_memory().unwrap();
        let visited = at(9, 0) + chrono::TimeDelta::milliseconds(750);
        store.record_visit("v1", visited).unwrap();
        assert_eq!(store.last_visit("v1").unwrap(), Some(visited));
        assert_eq!(
            store.aggregate_visits_by_half_hour().unwrap()[0].bucket,
            "2024-03-01T09:00"
        );
    }
}
