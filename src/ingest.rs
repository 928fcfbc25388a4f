//! Pulls playlist items from the upstream API into the video store.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::UpstreamConfig;
use crate::models::{NewVideo, PlaylistItem, PlaylistResponse};
use crate::store::{StoreError, VideoStore};

/// Page size requested from the upstream API. Only the first page is read.
pub const MAX_RESULTS: &str = "50";
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("requesting playlist items: {0}")]
    Request(#[from] Box<ureq::Error>),
    #[error("decoding playlist response: {0}")]
    Decode(#[source] std::io::Error),
}

/// Anything that can produce one page of playlist items.
pub trait PlaylistSource: Send + Sync {
    fn fetch_playlist(&self) -> Result<PlaylistResponse, IngestError>;
}

/// The YouTube Data API `playlistItems` endpoint.
pub struct YouTubePlaylist {
    agent: ureq::Agent,
    config: UpstreamConfig,
}

impl YouTubePlaylist {
    pub fn new(config: UpstreamConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(UPSTREAM_TIMEOUT).build();
        Self { agent, config }
    }
}

impl PlaylistSource for YouTubePlaylist {
    fn fetch_playlist(&self) -> Result<PlaylistResponse, IngestError> {
        let response = self
            .agent
            .get(&self.config.api_url)
            .query("part", "snippet")
            .query("maxResults", MAX_RESULTS)
            .query("playlistId", &self.config.playlist_id)
            .query("key", &self.config.api_key)
            .call()
            .map_err(Box::new)?;

        response.into_json().map_err(IngestError::Decode)
    }
}

/// Per-batch tally of what happened to each upstream item.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct IngestOutcome {
    /// Every item the upstream returned, stored or not.
    pub items: Vec<PlaylistItem>,
    pub report: IngestReport,
}

pub struct Ingestor {
    source: Box<dyn PlaylistSource>,
}

impl Ingestor {
    pub fn new(source: impl PlaylistSource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    /// Fetches one page from the upstream and inserts each item.
    ///
    /// Item failures (duplicates included) are logged and skipped; only a
    /// failed upstream call aborts the batch.
    pub fn fetch_and_store(&self, store: &VideoStore) -> Result<IngestOutcome, IngestError> {
        let playlist = self.source.fetch_playlist()?;
        let mut report = IngestReport::default();

        for item in &playlist.items {
            let video = NewVideo::from(&item.snippet);
            if video.video_id.is_empty() {
                warn!(title = %video.title, "skipping playlist item without a video id");
                report.failed += 1;
                continue;
            }

            match store.insert(&video) {
                Ok(row_id) => {
                    report.inserted += 1;
                    info!(row_id, video_id = %video.video_id, "stored video");
                }
                Err(StoreError::DuplicateKey(video_id)) => {
                    report.duplicates += 1;
                    warn!(%video_id, "video already stored, skipping");
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(video_id = %video.video_id, %err, "failed saving video");
                }
            }
        }

        info!(
            items = playlist.items.len(),
            inserted = report.inserted,
            duplicates = report.duplicates,
            failed = report.failed,
            "playlist ingestion finished"
        );

        Ok(IngestOutcome {
            items: playlist.items,
            report,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{ResourceId, Snippet};

    /// Serves a fixed page, or a decode failure when `items` is `None`.
    pub(crate) struct StaticPlaylist {
        pub items: Option<Vec<PlaylistItem>>,
    }

    impl PlaylistSource for StaticPlaylist {
        fn fetch_playlist(&self) -> Result<PlaylistResponse, IngestError> {
            match &self.items {
                Some(items) => Ok(PlaylistResponse {
                    items: items.clone(),
                }),
                None => Err(IngestError::Decode(std::io::Error::other(
                    "unexpected end of JSON",
                ))),
            }
        }
    }

    pub(crate) fn item(video_id: &str) -> PlaylistItem {
        PlaylistItem {
            snippet: Snippet {
                published_at: "2024-04-01T06:00:00Z".into(),
                title: format!("Flow {video_id}"),
                resource_id: ResourceId {
                    kind: "youtube#video".into(),
                    video_id: video_id.into(),
                },
                video_owner_channel_title: "Yoga Channel".into(),
                ..Snippet::default()
            },
        }
    }

    #[test]
    fn stores_every_item_in_order() {
        let store = VideoStore::open_in_memory().unwrap();
        let ingestor = Ingestor::new(StaticPlaylist {
            items: Some(vec![item("a"), item("b"), item("c")]),
        });

        let outcome = ingestor.fetch_and_store(&store).unwrap();
        assert_eq!(outcome.items.len(), 3);
        assert_eq!(outcome.report.inserted, 3);
        assert_eq!(store.count().unwrap(), 3);
        assert_eq!(store.get_by_row_id(2).unwrap().video_id, "b");
    }

    #[test]
    fn duplicate_item_does_not_abort_batch() {
        let store = VideoStore::open_in_memory().unwrap();
        store.insert(&NewVideo::from(&item("b").snippet)).unwrap();

        let ingestor = Ingestor::new(StaticPlaylist {
            items: Some(vec![item("a"), item("b"), item("c")]),
        });
        let outcome = ingestor.fetch_and_store(&store).unwrap();

        assert_eq!(
            outcome.report,
            IngestReport {
                inserted: 2,
                duplicates: 1,
                failed: 0
            }
        );
        assert_eq!(outcome.items.len(), 3);
        let stored: Vec<_> = store
            .get_all()
            .unwrap()
            .into_iter()
            .map(|video| video.video_id)
            .collect();
        assert_eq!(stored, ["b", "a", "c"]);
    }

    #[test]
    fn items_without_video_id_are_counted_as_failed() {
        let store = VideoStore::open_in_memory().unwrap();
        let ingestor = Ingestor::new(StaticPlaylist {
            items: Some(vec![item(""), item("a")]),
        });

        let outcome = ingestor.fetch_and_store(&store).unwrap();
        assert_eq!(outcome.report.failed, 1);
        assert_eq!(outcome.report.inserted, 1);
        assert_eq!(outcome.items.len(), 2);
    }

    #[test]
    fn upstream_failure_stores_nothing() {
        let store = VideoStore::open_in_memory().unwrap();
        let ingestor = Ingestor::new(StaticPlaylist { items: None });

        let err = ingestor.fetch_and_store(&store).unwrap_err();
        assert!(matches!(err, IngestError::Decode(_)));
        assert_eq!(store.count().unwrap(), 0);
    }
}
