//! Image records.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::ids::{AlbumId, ImageId, UserId};
use super::json_list;

/// Column list matching [`Image::from_row`].
pub(crate) const IMAGE_COLUMNS: &str = "id, owner_id, album_id, url, blob_id, name, size_bytes, \
     is_favourite, tags, person, comments, created_at, updated_at";

/// An uploaded photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: ImageId,
    pub owner: UserId,
    pub album: Option<AlbumId>,
    pub url: String,
    pub blob_id: String,
    pub name: String,
    pub size_bytes: i64,
    pub is_favourite: bool,
    pub tags: Vec<String>,
    pub person: String,
    pub comments: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Image {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Image {
            id: row.get(0)?,
            owner: row.get(1)?,
            album: row.get(2)?,
            url: row.get(3)?,
            blob_id: row.get(4)?,
            name: row.get(5)?,
            size_bytes: row.get(6)?,
            is_favourite: row.get(7)?,
            tags: json_list(row, 8)?,
            person: row.get(9)?,
            comments: json_list(row, 10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }
}

/// What the upload path knows about a freshly stored asset.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub name: String,
    pub url: String,
    pub blob_id: String,
    pub size_bytes: i64,
}
