//! Library operations that keep images and albums consistent with each other.
//!
//! Every operation takes the caller's [`UserId`] and works through an
//! [`OwnerScope`], so it can only ever see that user's records. Operations that
//! touch more than one row run inside a single write transaction: readers see
//! either the state before or after, never a cover pointing at a deleted image
//! or an image filed into a deleted album.
//!
//! The user row must exist before anything is written for it (see
//! [`Database::find_or_create_user`]); uploads and album creation for an
//! unknown user fail with `NotFound` for [`Entity::User`].

mod batch;
#[cfg(test)]
mod tests;

pub use batch::{
    AddImagesResult, ItemOutcome, Outcomes, PendingDeleteReport, RemoveImagesResult, SkipReason,
};

use chrono::Utc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::blob::{BlobError, BlobStore};
use crate::config::{Config, EngineConfig, UploadConfig};
use crate::db::{
    Album, AlbumId, AlbumPatch, AlbumSummary, AlbumWithImages, Database, Image, ImageId,
    NewImage, OwnerScope, UserId,
};
use crate::error::{EngineError, EngineResult, Entity};
use crate::upload;
use batch::dedup;

pub struct Engine<B> {
    db: Database,
    blobs: B,
    upload: UploadConfig,
    settings: EngineConfig,
}

impl<B: BlobStore> Engine<B> {
    pub fn new(db: Database, blobs: B, config: &Config) -> Self {
        Self {
            db,
            blobs,
            upload: config.upload.clone(),
            settings: config.engine.clone(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ========================================================================
    // Images
    // ========================================================================

    /// Validate and store a new photo. The record is only created once blob
    /// storage has accepted the bytes.
    pub fn upload_image(&self, user: UserId, file_name: &str, bytes: &[u8]) -> EngineResult<Image> {
        let accepted = upload::validate(&self.upload, bytes)?;
        let stored = self.blobs.upload(file_name, bytes)?;

        let new = NewImage {
            name: file_name.to_string(),
            url: stored.url,
            blob_id: stored.blob_id,
            size_bytes: accepted.size_bytes as i64,
        };
        match self.db.write(|conn| OwnerScope::new(conn, user).insert_image(&new)) {
            Ok(image) => {
                info!(user = %user, image = %image.id, format = ?accepted.format, "Image uploaded");
                Ok(image)
            }
            Err(e) => {
                // Don't leave an asset behind that no record points at.
                if let Err(cleanup) = self.blobs.delete(&new.blob_id) {
                    warn!(blob = %new.blob_id, "Failed to remove orphaned upload: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    pub fn list_images(&self, user: UserId) -> EngineResult<Vec<Image>> {
        self.db.read(|conn| OwnerScope::new(conn, user).list_images())
    }

    pub fn list_favourites(&self, user: UserId) -> EngineResult<Vec<Image>> {
        self.db.read(|conn| OwnerScope::new(conn, user).list_favourites())
    }

    pub fn get_image(&self, user: UserId, image_id: ImageId) -> EngineResult<Image> {
        self.db.read(|conn| {
            OwnerScope::new(conn, user)
                .find_image(image_id)?
                .ok_or_else(|| EngineError::not_found(Entity::Image, image_id))
        })
    }

    pub fn set_favourite(&self, user: UserId, image_id: ImageId, value: bool) -> EngineResult<Image> {
        self.db.write(|conn| {
            let scope = OwnerScope::new(conn, user);
            if !scope.set_favourite(image_id, value)? {
                return Err(EngineError::not_found(Entity::Image, image_id));
            }
            scope
                .find_image(image_id)?
                .ok_or_else(|| EngineError::not_found(Entity::Image, image_id))
        })
    }

    /// Delete a photo and repoint every album that used it as a cover.
    ///
    /// The image is marked as deleting before blob storage is asked, which
    /// hides it from every listing. If storage refuses, the mark is lifted
    /// and nothing else changes. Once the blob is gone the local delete is
    /// retried up to `engine.commit_retry_attempts`; if it still cannot
    /// commit, the mark stays and calling this again (or
    /// [`finish_pending_deletes`](Self::finish_pending_deletes)) completes it.
    pub fn delete_image(&self, user: UserId, image_id: ImageId) -> EngineResult<Image> {
        let (image, resumed) = self.db.write(|conn| {
            let scope = OwnerScope::new(conn, user);
            let (image, pending) = scope
                .find_image_for_delete(image_id)?
                .ok_or_else(|| EngineError::not_found(Entity::Image, image_id))?;
            if !pending {
                scope.mark_deleting(image_id)?;
            }
            Ok((image, pending))
        })?;
        if resumed {
            info!(user = %user, image = %image_id, "Resuming unfinished image delete");
        }

        if let Err(e) = self.delete_blob(&image.blob_id) {
            if !resumed {
                let unmarked = self
                    .db
                    .write(|conn| OwnerScope::new(conn, user).unmark_deleting(image_id));
                if let Err(undo) = unmarked {
                    warn!(image = %image_id, "Could not clear delete mark: {}", undo);
                }
            }
            return Err(e);
        }

        let recovered = self.commit_image_removal(user, &image)?;
        info!(user = %user, image = %image_id, albums = recovered, "Image deleted");
        Ok(image)
    }

    /// Complete every delete that got as far as marking the image but never
    /// committed. Safe to run at any time, typically once at startup.
    pub fn finish_pending_deletes(&self) -> EngineResult<PendingDeleteReport> {
        let mut report = PendingDeleteReport::default();
        for pending in self.db.pending_deletes()? {
            let finished = self.delete_blob(&pending.blob_id).and_then(|()| {
                self.db.write(|conn| {
                    remove_image(&OwnerScope::new(conn, pending.owner), pending.image)
                })
            });
            match finished {
                Ok(_) => {
                    debug!(user = %pending.owner, image = %pending.image, "Pending delete finished");
                    report.finished.push(pending.image);
                }
                Err(e) => {
                    warn!(image = %pending.image, "Pending delete still blocked: {}", e);
                    report.still_pending.push(pending.image);
                }
            }
        }

        if !report.finished.is_empty() || !report.still_pending.is_empty() {
            info!(
                finished = report.finished.len(),
                still_pending = report.still_pending.len(),
                "Pending image deletes processed"
            );
        }
        Ok(report)
    }

    /// A blob that is already gone counts as deleted.
    fn delete_blob(&self, blob_id: &str) -> EngineResult<()> {
        match self.blobs.delete(blob_id) {
            Ok(()) => debug!(blob = %blob_id, "Blob deleted"),
            Err(BlobError::Missing(_)) => debug!(blob = %blob_id, "Blob already gone"),
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn commit_image_removal(&self, user: UserId, image: &Image) -> EngineResult<usize> {
        let attempts = self.settings.commit_retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.db.write(|conn| remove_image(&OwnerScope::new(conn, user), image.id)) {
                Ok(recovered) => return Ok(recovered),
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(image = %image.id, attempt, "Retrying image delete: {}", e);
                    thread::sleep(Duration::from_millis(
                        self.settings.commit_retry_backoff_ms * u64::from(attempt),
                    ));
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        image = %image.id,
                        blob = %image.blob_id,
                        "Blob deleted but image record could not be removed; left pending: {}",
                        e
                    );
                    return Err(e);
                }
            }
        }
    }

    // ========================================================================
    // Albums
    // ========================================================================

    pub fn create_album(
        &self,
        user: UserId,
        name: &str,
        description: Option<&str>,
    ) -> EngineResult<Album> {
        let name = validate_album_name(name)?;
        let description = normalize_description(description);

        let album = self.db.write(|conn| {
            let scope = OwnerScope::new(conn, user);
            if scope.album_name_taken(name, None)? {
                return Err(duplicate_name(name));
            }
            scope.insert_album(name, description.as_deref())
        })?;
        info!(user = %user, album = %album.id, "Album created");
        Ok(album)
    }

    pub fn list_albums(&self, user: UserId) -> EngineResult<Vec<AlbumSummary>> {
        self.db.read(|conn| OwnerScope::new(conn, user).list_albums())
    }

    pub fn get_album(&self, user: UserId, album_id: AlbumId) -> EngineResult<AlbumWithImages> {
        self.db.read(|conn| {
            let scope = OwnerScope::new(conn, user);
            let album = find_album(&scope, album_id)?;
            let images = scope.images_in_album(album_id)?;
            Ok(AlbumWithImages { album, images })
        })
    }

    /// File the listed images into an album. Ids that don't resolve to one of
    /// the caller's images are skipped. A coverless album gets the first image
    /// that was actually filed as its cover; an existing cover is kept.
    pub fn add_images_to_album(
        &self,
        user: UserId,
        album_id: AlbumId,
        image_ids: &[ImageId],
    ) -> EngineResult<AddImagesResult> {
        if image_ids.is_empty() {
            return Err(EngineError::validation("at least one image id is required"));
        }

        let result = self.db.write(|conn| {
            let scope = OwnerScope::new(conn, user);
            find_album(&scope, album_id)?;

            let mut items = Vec::with_capacity(image_ids.len());
            let mut first_filed = None;
            for (id, first) in dedup(image_ids) {
                if !first {
                    items.push(ItemOutcome::Skipped { id, reason: SkipReason::Duplicate });
                    continue;
                }
                if !scope.assign_image_to_album(id, album_id)? {
                    debug!(image = %id, "Skipping image not owned by caller");
                    items.push(ItemOutcome::Skipped { id, reason: SkipReason::NotFound });
                    continue;
                }
                let image = scope
                    .find_image(id)?
                    .ok_or_else(|| EngineError::not_found(Entity::Image, id))?;
                first_filed.get_or_insert(id);
                items.push(ItemOutcome::Updated { image });
            }

            if let Some(cover) = first_filed {
                if scope.set_cover_if_unset(album_id, cover)? {
                    debug!(album = %album_id, image = %cover, "Cover set");
                }
            }

            let album = find_album(&scope, album_id)?;
            Ok(AddImagesResult { album, items })
        })?;

        info!(
            user = %user,
            album = %album_id,
            added = result.updated().len(),
            skipped = result.skipped().len(),
            "Images added to album"
        );
        Ok(result)
    }

    /// Unfile the listed images from an album. Images that are not in the
    /// album are skipped. The album's cover is left untouched even if it was
    /// one of the removed images.
    pub fn remove_images_from_album(
        &self,
        user: UserId,
        album_id: AlbumId,
        image_ids: &[ImageId],
    ) -> EngineResult<RemoveImagesResult> {
        if image_ids.is_empty() {
            return Err(EngineError::validation("photo ids are required"));
        }

        let result = self.db.write(|conn| {
            let scope = OwnerScope::new(conn, user);
            find_album(&scope, album_id)?;

            let mut items = Vec::with_capacity(image_ids.len());
            for (id, first) in dedup(image_ids) {
                if !first {
                    items.push(ItemOutcome::Skipped { id, reason: SkipReason::Duplicate });
                    continue;
                }
                if scope.detach_image_from_album(id, album_id)? {
                    let image = scope
                        .find_image(id)?
                        .ok_or_else(|| EngineError::not_found(Entity::Image, id))?;
                    items.push(ItemOutcome::Updated { image });
                } else {
                    let reason = match scope.find_image(id)? {
                        Some(_) => SkipReason::NotInAlbum,
                        None => SkipReason::NotFound,
                    };
                    debug!(image = %id, ?reason, "Skipping image");
                    items.push(ItemOutcome::Skipped { id, reason });
                }
            }
            Ok(RemoveImagesResult { album_id, items })
        })?;

        info!(
            user = %user,
            album = %album_id,
            removed = result.updated().len(),
            skipped = result.skipped().len(),
            "Images removed from album"
        );
        Ok(result)
    }

    /// Delete an album. Its images stay in the library, unfiled.
    pub fn delete_album(&self, user: UserId, album_id: AlbumId) -> EngineResult<Album> {
        let (album, detached) = self.db.write(|conn| {
            let scope = OwnerScope::new(conn, user);
            let album = find_album(&scope, album_id)?;
            let detached = scope.detach_all_from_album(album_id)?;
            scope.delete_album(album_id)?;
            Ok((album, detached))
        })?;
        info!(user = %user, album = %album_id, detached, "Album deleted");
        Ok(album)
    }

    pub fn edit_album(
        &self,
        user: UserId,
        album_id: AlbumId,
        patch: &AlbumPatch,
    ) -> EngineResult<Album> {
        let album = self.db.write(|conn| {
            let scope = OwnerScope::new(conn, user);
            let mut album = find_album(&scope, album_id)?;
            if patch.is_empty() {
                return Ok(album);
            }

            if let Some(name) = &patch.name {
                let name = validate_album_name(name)?;
                if scope.album_name_taken(name, Some(album_id))? {
                    return Err(duplicate_name(name));
                }
                album.name = name.to_string();
            }
            if let Some(description) = &patch.description {
                album.description = normalize_description(description.as_deref());
            }
            if let Some(cover) = patch.cover_image {
                if let Some(image_id) = cover {
                    if scope.find_image(image_id)?.is_none() {
                        return Err(EngineError::validation(format!(
                            "cover image {image_id} is not one of your photos"
                        )));
                    }
                }
                album.cover_image = cover;
            }
            if let Some(shared_with) = &patch.shared_with {
                album.shared_with = shared_with.clone();
            }

            album.updated_at = Utc::now();
            scope.update_album(&album)?;
            Ok(album)
        })?;
        info!(user = %user, album = %album_id, "Album edited");
        Ok(album)
    }
}

/// Delete the image row and give each album it covered a new cover: the
/// oldest image still filed into that album and not itself being deleted,
/// or none. Safe to re-run.
fn remove_image(scope: &OwnerScope<'_>, image_id: ImageId) -> EngineResult<usize> {
    let covered = scope.albums_covered_by(image_id)?;
    if !scope.delete_image(image_id)? {
        debug!(image = %image_id, "Image row already gone");
    }

    for album in &covered {
        let replacement = scope.first_image_in_album(*album)?;
        scope.set_cover(*album, replacement)?;
        match replacement {
            Some(cover) => debug!(album = %album, image = %cover, "Cover reassigned"),
            None => debug!(album = %album, "Cover cleared"),
        }
    }
    Ok(covered.len())
}

fn find_album(scope: &OwnerScope<'_>, album_id: AlbumId) -> EngineResult<Album> {
    scope
        .find_album(album_id)?
        .ok_or_else(|| EngineError::not_found(Entity::Album, album_id))
}

fn validate_album_name(name: &str) -> EngineResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::validation("album name is required"));
    }
    Ok(name)
}

fn normalize_description(description: Option<&str>) -> Option<String> {
    description
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
}

fn duplicate_name(name: &str) -> EngineError {
    EngineError::validation(format!("an album named '{name}' already exists"))
}
