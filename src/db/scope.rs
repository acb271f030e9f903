//! Owner-scoped access to images and albums.
//!
//! Every query in here carries `owner_id = ?` bound to the scope's owner, so a
//! caller holding an [`OwnerScope`] cannot see or touch anyone else's rows.
//! Records belonging to other users are indistinguishable from missing ones.
//!
//! Images whose delete has started (`deleting_at` set) are treated as gone by
//! every read and write here except the few delete-path methods that name them.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::albums::{Album, AlbumSummary, ALBUM_COLUMNS};
use super::ids::{AlbumId, ImageId, UserId};
use super::images::{Image, NewImage, IMAGE_COLUMNS};
use crate::error::{EngineError, EngineResult, Entity};

pub struct OwnerScope<'c> {
    conn: &'c Connection,
    owner: UserId,
}

impl<'c> OwnerScope<'c> {
    pub fn new(conn: &'c Connection, owner: UserId) -> Self {
        Self { conn, owner }
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    // ========================================================================
    // Images
    // ========================================================================

    pub fn find_image(&self, id: ImageId) -> EngineResult<Option<Image>> {
        let image = self
            .conn
            .query_row(
                &format!(
                    "SELECT {IMAGE_COLUMNS} FROM images
                     WHERE id = ? AND owner_id = ? AND deleting_at IS NULL"
                ),
                params![id, self.owner],
                Image::from_row,
            )
            .optional()?;
        Ok(image)
    }

    /// Like [`find_image`](Self::find_image), but also returns an image whose
    /// delete is pending, with a flag saying so.
    pub fn find_image_for_delete(&self, id: ImageId) -> EngineResult<Option<(Image, bool)>> {
        let found = self
            .conn
            .query_row(
                &format!(
                    "SELECT {IMAGE_COLUMNS}, deleting_at IS NOT NULL
                     FROM images WHERE id = ? AND owner_id = ?"
                ),
                params![id, self.owner],
                |row| Ok((Image::from_row(row)?, row.get(13)?)),
            )
            .optional()?;
        Ok(found)
    }

    pub fn list_images(&self) -> EngineResult<Vec<Image>> {
        self.query_images("owner_id = ?1", params![self.owner])
    }

    pub fn list_favourites(&self) -> EngineResult<Vec<Image>> {
        self.query_images("owner_id = ?1 AND is_favourite = 1", params![self.owner])
    }

    /// Images filed into `album`, in creation order.
    pub fn images_in_album(&self, album: AlbumId) -> EngineResult<Vec<Image>> {
        self.query_images("owner_id = ?1 AND album_id = ?2", params![self.owner, album])
    }

    /// Oldest image still filed into `album`; the deterministic cover candidate.
    pub fn first_image_in_album(&self, album: AlbumId) -> EngineResult<Option<ImageId>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM images
                 WHERE owner_id = ? AND album_id = ? AND deleting_at IS NULL
                 ORDER BY id LIMIT 1",
                params![self.owner, album],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn query_images(&self, filter: &str, args: &[&dyn rusqlite::ToSql]) -> EngineResult<Vec<Image>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images
             WHERE {filter} AND deleting_at IS NULL
             ORDER BY id"
        ))?;
        let images = stmt
            .query_map(args, Image::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(images)
    }

    pub fn insert_image(&self, new: &NewImage) -> EngineResult<Image> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO images (owner_id, url, blob_id, name, size_bytes, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![self.owner, new.url, new.blob_id, new.name, new.size_bytes, now, now],
        )
        .map_err(|e| missing_owner(e, self.owner))?;
        Ok(Image {
            id: ImageId(self.conn.last_insert_rowid()),
            owner: self.owner,
            album: None,
            url: new.url.clone(),
            blob_id: new.blob_id.clone(),
            name: new.name.clone(),
            size_bytes: new.size_bytes,
            is_favourite: false,
            tags: Vec::new(),
            person: String::new(),
            comments: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// File an image into `album`. Returns false when the image is not ours.
    pub fn assign_image_to_album(&self, id: ImageId, album: AlbumId) -> EngineResult<bool> {
        let changed = self.conn.execute(
            "UPDATE images SET album_id = ?, updated_at = ?
             WHERE id = ? AND owner_id = ? AND deleting_at IS NULL",
            params![album, Utc::now(), id, self.owner],
        )?;
        Ok(changed > 0)
    }

    /// Unfile an image, but only if it currently sits in `album`.
    pub fn detach_image_from_album(&self, id: ImageId, album: AlbumId) -> EngineResult<bool> {
        let changed = self.conn.execute(
            "UPDATE images SET album_id = NULL, updated_at = ?
             WHERE id = ? AND owner_id = ? AND album_id = ?",
            params![Utc::now(), id, self.owner, album],
        )?;
        Ok(changed > 0)
    }

    /// Unfile every image in `album`. Returns how many were detached.
    pub fn detach_all_from_album(&self, album: AlbumId) -> EngineResult<usize> {
        let changed = self.conn.execute(
            "UPDATE images SET album_id = NULL, updated_at = ? WHERE owner_id = ? AND album_id = ?",
            params![Utc::now(), self.owner, album],
        )?;
        Ok(changed)
    }

    pub fn set_favourite(&self, id: ImageId, value: bool) -> EngineResult<bool> {
        let changed = self.conn.execute(
            "UPDATE images SET is_favourite = ?, updated_at = ?
             WHERE id = ? AND owner_id = ? AND deleting_at IS NULL",
            params![value, Utc::now(), id, self.owner],
        )?;
        Ok(changed > 0)
    }

    /// Record that a delete of `id` has started. Returns false when the image
    /// is missing or already marked.
    pub fn mark_deleting(&self, id: ImageId) -> EngineResult<bool> {
        let changed = self.conn.execute(
            "UPDATE images SET deleting_at = ?
             WHERE id = ? AND owner_id = ? AND deleting_at IS NULL",
            params![Utc::now(), id, self.owner],
        )?;
        Ok(changed > 0)
    }

    pub fn unmark_deleting(&self, id: ImageId) -> EngineResult<bool> {
        let changed = self.conn.execute(
            "UPDATE images SET deleting_at = NULL WHERE id = ? AND owner_id = ?",
            params![id, self.owner],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_image(&self, id: ImageId) -> EngineResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM images WHERE id = ? AND owner_id = ?",
            params![id, self.owner],
        )?;
        Ok(changed > 0)
    }

    // ========================================================================
    // Albums
    // ========================================================================

    pub fn find_album(&self, id: AlbumId) -> EngineResult<Option<Album>> {
        let album = self
            .conn
            .query_row(
                &format!("SELECT {ALBUM_COLUMNS} FROM albums WHERE id = ? AND owner_id = ?"),
                params![id, self.owner],
                Album::from_row,
            )
            .optional()?;
        Ok(album)
    }

    /// All albums with their cover url. The cover join is owner-scoped too.
    pub fn list_albums(&self) -> EngineResult<Vec<AlbumSummary>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT a.id, a.owner_id, a.name, a.description, a.cover_image_id, a.shared_with,
                   a.created_at, a.updated_at, i.url
            FROM albums a
            LEFT JOIN images i
                ON i.id = a.cover_image_id AND i.owner_id = a.owner_id AND i.deleting_at IS NULL
            WHERE a.owner_id = ?
            ORDER BY a.id
            "#,
        )?;
        let albums = stmt
            .query_map([self.owner], |row| {
                Ok(AlbumSummary {
                    album: Album::from_row(row)?,
                    cover_url: row.get(8)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(albums)
    }

    /// Albums whose cover is `image`.
    pub fn albums_covered_by(&self, image: ImageId) -> EngineResult<Vec<AlbumId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM albums WHERE owner_id = ? AND cover_image_id = ? ORDER BY id")?;
        let ids = stmt
            .query_map(params![self.owner, image], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    pub fn album_name_taken(&self, name: &str, except: Option<AlbumId>) -> EngineResult<bool> {
        let taken = self
            .conn
            .query_row(
                "SELECT 1 FROM albums WHERE owner_id = ? AND name = ? AND id IS NOT ?",
                params![self.owner, name, except],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        Ok(taken)
    }

    pub fn insert_album(&self, name: &str, description: Option<&str>) -> EngineResult<Album> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO albums (owner_id, name, description, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
            params![self.owner, name, description, now, now],
        )
        .map_err(|e| missing_owner(e, self.owner))?;
        Ok(Album {
            id: AlbumId(self.conn.last_insert_rowid()),
            owner: self.owner,
            name: name.to_string(),
            description: description.map(str::to_string),
            cover_image: None,
            shared_with: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Write back the mutable fields of `album`. The owner column is never written.
    pub fn update_album(&self, album: &Album) -> EngineResult<bool> {
        let shared_with = serde_json::to_string(&album.shared_with)?;
        let changed = self.conn.execute(
            "UPDATE albums
             SET name = ?, description = ?, cover_image_id = ?, shared_with = ?, updated_at = ?
             WHERE id = ? AND owner_id = ?",
            params![
                album.name,
                album.description,
                album.cover_image,
                shared_with,
                album.updated_at,
                album.id,
                self.owner
            ],
        )?;
        Ok(changed > 0)
    }

    /// Set the cover only while none is set. Returns whether this call set it.
    pub fn set_cover_if_unset(&self, album: AlbumId, image: ImageId) -> EngineResult<bool> {
        let changed = self.conn.execute(
            "UPDATE albums SET cover_image_id = ?, updated_at = ?
             WHERE id = ? AND owner_id = ? AND cover_image_id IS NULL",
            params![image, Utc::now(), album, self.owner],
        )?;
        Ok(changed > 0)
    }

    pub fn set_cover(&self, album: AlbumId, image: Option<ImageId>) -> EngineResult<bool> {
        let changed = self.conn.execute(
            "UPDATE albums SET cover_image_id = ?, updated_at = ? WHERE id = ? AND owner_id = ?",
            params![image, Utc::now(), album, self.owner],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_album(&self, id: AlbumId) -> EngineResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM albums WHERE id = ? AND owner_id = ?",
            params![id, self.owner],
        )?;
        Ok(changed > 0)
    }
}

/// Inserts reference no row but the owner, so a foreign key failure there
/// means the user record does not exist.
fn missing_owner(err: rusqlite::Error, owner: UserId) -> EngineError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
        {
            EngineError::not_found(Entity::User, owner)
        }
        _ => err.into(),
    }
}
