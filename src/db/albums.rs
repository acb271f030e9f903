//! Album records and the edit patch applied to them.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::ids::{AlbumId, ImageId, UserId};
use super::images::Image;
use super::json_list;

pub(crate) const ALBUM_COLUMNS: &str =
    "id, owner_id, name, description, cover_image_id, shared_with, created_at, updated_at";

/// A named collection of photos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: AlbumId,
    pub owner: UserId,
    pub name: String,
    pub description: Option<String>,
    pub cover_image: Option<ImageId>,
    pub shared_with: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Album {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Album {
            id: row.get(0)?,
            owner: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            cover_image: row.get(4)?,
            shared_with: json_list(row, 5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

/// Album listing entry with the cover's url resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumSummary {
    #[serde(flatten)]
    pub album: Album,
    pub cover_url: Option<String>,
}

/// An album together with the photos filed into it, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumWithImages {
    pub album: Album,
    pub images: Vec<Image>,
}

/// Partial update for an album. `None` leaves a field untouched; the nested
/// `Option`s distinguish "clear" (`Some(None)`) from "keep" (`None`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub cover_image: Option<Option<ImageId>>,
    pub shared_with: Option<Vec<String>>,
}

impl AlbumPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.cover_image.is_none()
            && self.shared_with.is_none()
    }
}
