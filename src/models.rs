//! Shapes shared by the store, the ingestor and the HTTP API.
//!
//! The upstream playlist API returns `{"items": [{"snippet": {...}}]}`. The
//! frontend was written against that snippet layout, so stored videos are
//! serialized back into the same shape (plus the row id) instead of exposing
//! the flat table columns.

use serde::{Deserialize, Serialize};

/// Top-level body of a `playlistItems` response. Only the first page is read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistResponse {
    #[serde(default)]
    pub items: Vec<PlaylistItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaylistItem {
    #[serde(default)]
    pub snippet: Snippet,
}

/// Video metadata as the upstream API (and the frontend) lays it out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub published_at: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub thumbnails: Thumbnails,
    #[serde(default)]
    pub resource_id: ResourceId,
    #[serde(default)]
    pub video_owner_channel_title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thumbnails {
    #[serde(default)]
    pub default: Thumbnail,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<Thumbnail>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thumbnail {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceId {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default)]
    pub video_id: String,
}

/// A row of the `videos` table.
///
/// Rows are written once by the ingestor and never updated or deleted, so the
/// row id doubles as the position used by the daily rotation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "Snippet")]
pub struct VideoRecord {
    pub id: i64,
    pub published_at: String,
    pub title: String,
    pub description: String,
    pub thumbnail_url: String,
    pub video_id: String,
    pub channel_title: String,
}

/// A video that has not been assigned a row id yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewVideo {
    pub published_at: String,
    pub title: String,
    pub description: String,
    pub thumbnail_url: String,
    pub video_id: String,
    pub channel_title: String,
}

impl From<&Snippet> for NewVideo {
    fn from(snippet: &Snippet) -> Self {
        Self {
            published_at: snippet.published_at.clone(),
            title: snippet.title.clone(),
            description: snippet.description.clone(),
            thumbnail_url: snippet.thumbnails.default.url.clone(),
            video_id: snippet.resource_id.video_id.trim().to_owned(),
            channel_title: snippet.video_owner_channel_title.clone(),
        }
    }
}

impl From<VideoRecord> for Snippet {
    fn from(record: VideoRecord) -> Self {
        Self {
            id: Some(record.id),
            published_at: record.published_at,
            title: record.title,
            description: record.description,
            thumbnails: Thumbnails {
                default: Thumbnail {
                    url: record.thumbnail_url,
                    ..Thumbnail::default()
                },
                medium: None,
            },
            resource_id: ResourceId {
                kind: String::new(),
                video_id: record.video_id,
            },
            video_owner_channel_title: record.channel_title,
        }
    }
}

/// Visits recorded on one UTC calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyVisits {
    pub date: String,
    pub count: i64,
}

/// Visits recorded in one half-hour bucket, keyed `YYYY-MM-DDTHH:00` or
/// `YYYY-MM-DDTHH:30`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HalfHourVisits {
    pub bucket: String,
    pub count: i64,
}
