//! Per-item results for the best-effort batch operations.

use serde::Serialize;

use crate::db::{Album, AlbumId, Image, ImageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// No image with that id belongs to the caller.
    NotFound,
    /// The image exists but is not filed into the album.
    NotInAlbum,
    /// The id already appeared earlier in the same request.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ItemOutcome {
    Updated { image: Image },
    Skipped { id: ImageId, reason: SkipReason },
}

impl ItemOutcome {
    pub fn image(&self) -> Option<&Image> {
        match self {
            ItemOutcome::Updated { image } => Some(image),
            ItemOutcome::Skipped { .. } => None,
        }
    }
}

/// Shared helpers over a list of outcomes.
pub trait Outcomes {
    fn outcomes(&self) -> &[ItemOutcome];

    fn updated(&self) -> Vec<&Image> {
        self.outcomes().iter().filter_map(ItemOutcome::image).collect()
    }

    fn skipped(&self) -> Vec<(ImageId, SkipReason)> {
        self.outcomes()
            .iter()
            .filter_map(|outcome| match outcome {
                ItemOutcome::Skipped { id, reason } => Some((*id, *reason)),
                ItemOutcome::Updated { .. } => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddImagesResult {
    pub album: Album,
    pub items: Vec<ItemOutcome>,
}

impl Outcomes for AddImagesResult {
    fn outcomes(&self) -> &[ItemOutcome] {
        &self.items
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveImagesResult {
    pub album_id: AlbumId,
    pub items: Vec<ItemOutcome>,
}

impl Outcomes for RemoveImagesResult {
    fn outcomes(&self) -> &[ItemOutcome] {
        &self.items
    }
}

/// What a [`finish_pending_deletes`](super::Engine::finish_pending_deletes) pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDeleteReport {
    pub finished: Vec<ImageId>,
    pub still_pending: Vec<ImageId>,
}

/// Split ids into first occurrences and repeats, keeping request order.
pub(crate) fn dedup(ids: &[ImageId]) -> Vec<(ImageId, bool)> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    ids.iter().map(|id| (*id, seen.insert(*id))).collect()
}
