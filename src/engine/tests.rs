use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use tempfile::TempDir;

use super::*;
use crate::blob::{BlobError, UploadedBlob};
use crate::config::DatabaseConfig;
use crate::error::Entity;
use crate::db::{User, UserProfile};
use crate::upload::fixtures::{JPEG, PNG};

type DeleteHook = Box<dyn FnOnce() + Send>;

/// In-memory blob storage that can be told to fail. Like a real provider it
/// refuses to delete a blob it does not hold.
#[derive(Default)]
struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, usize>>,
    next_id: AtomicU64,
    fail_uploads: AtomicBool,
    fail_deletes: AtomicBool,
    /// Runs once, inside the next successful delete.
    on_delete: Mutex<Option<DeleteHook>>,
}

impl MemoryBlobStore {
    fn contains(&self, blob_id: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(blob_id)
    }
}

impl BlobStore for MemoryBlobStore {
    fn upload(&self, _file_name: &str, bytes: &[u8]) -> Result<UploadedBlob, BlobError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable("upload disabled".to_string()));
        }
        let blob_id = format!("uploads/{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.blobs.lock().unwrap().insert(blob_id.clone(), bytes.len());
        Ok(UploadedBlob {
            url: format!("https://blobs.test/{blob_id}"),
            blob_id,
        })
    }

    fn delete(&self, blob_id: &str) -> Result<(), BlobError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(BlobError::Delete {
                blob_id: blob_id.to_string(),
                reason: "delete disabled".to_string(),
            });
        }
        if self.blobs.lock().unwrap().remove(blob_id).is_none() {
            return Err(BlobError::Missing(blob_id.to_string()));
        }
        let hook = self.on_delete.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(())
    }
}

/// SQLite's write lock held from a second connection, until released or
/// `hold` runs out.
struct WriteLock {
    release: mpsc::Sender<()>,
    holder: std::thread::JoinHandle<()>,
}

impl WriteLock {
    fn take(path: &Path, hold: Duration) -> Self {
        let path = path.to_path_buf();
        let (locked_tx, locked_rx) = mpsc::channel();
        let (release, release_rx) = mpsc::channel::<()>();
        let holder = std::thread::spawn(move || {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute_batch("BEGIN EXCLUSIVE").unwrap();
            locked_tx.send(()).unwrap();
            let _ = release_rx.recv_timeout(hold);
            conn.execute_batch("COMMIT").unwrap();
        });
        locked_rx.recv().unwrap();
        Self { release, holder }
    }

    fn release(self) {
        let _ = self.release.send(());
        self.holder.join().unwrap();
    }
}

type LockSlot = Arc<Mutex<Option<WriteLock>>>;

struct Fixture {
    engine: Engine<MemoryBlobStore>,
    db_path: PathBuf,
    _dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(Config::default())
    }

    fn with_config(config: Config) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("library.db");
        let db = Database::open(&db_path, &config.database).unwrap();
        db.initialize().unwrap();
        let engine = Engine::new(db, MemoryBlobStore::default(), &config);
        Self { engine, db_path, _dir: dir }
    }

    /// Short lock waits, so a held write lock fails commits quickly.
    fn impatient(commit_retry_attempts: u32, commit_retry_backoff_ms: u64) -> Self {
        let mut config = Config::default();
        config.database = DatabaseConfig { busy_timeout_ms: 20, ..DatabaseConfig::default() };
        config.engine = EngineConfig { commit_retry_attempts, commit_retry_backoff_ms };
        Self::with_config(config)
    }

    /// Grab the write lock as soon as the next blob delete succeeds, i.e.
    /// between blob storage and the local commit.
    fn lock_db_after_next_blob_delete(&self, hold: Duration) -> LockSlot {
        let slot: LockSlot = Arc::default();
        let target = slot.clone();
        let path = self.db_path.clone();
        *self.engine.blobs.on_delete.lock().unwrap() = Some(Box::new(move || {
            *target.lock().unwrap() = Some(WriteLock::take(&path, hold));
        }));
        slot
    }

    fn pending_deletes(&self) -> i64 {
        self.engine.database().consistency_report().unwrap().pending_deletes
    }

    fn user(&self, name: &str) -> UserId {
        let user: User = self
            .engine
            .database()
            .find_or_create_user(&UserProfile {
                external_id: format!("google-{name}"),
                name: name.to_string(),
                email: format!("{name}@example.com"),
                picture_url: None,
            })
            .unwrap();
        user.id
    }

    fn image(&self, user: UserId, name: &str) -> ImageId {
        self.engine.upload_image(user, name, PNG).unwrap().id
    }

    fn album(&self, user: UserId, name: &str) -> AlbumId {
        self.engine.create_album(user, name, None).unwrap().id
    }

    fn cover(&self, user: UserId, album: AlbumId) -> Option<ImageId> {
        self.engine.get_album(user, album).unwrap().album.cover_image
    }

    fn album_of(&self, user: UserId, image: ImageId) -> Option<AlbumId> {
        self.engine.get_image(user, image).unwrap().album
    }

    fn assert_consistent(&self) {
        let report = self.engine.database().consistency_report().unwrap();
        assert!(report.is_clean(), "inconsistent library: {report:?}");
    }
}

// ============================================================================
// Uploads and favourites
// ============================================================================

#[test]
fn test_upload_creates_unfiled_image() {
    let fx = Fixture::new();
    let alice = fx.user("alice");

    let image = fx.engine.upload_image(alice, "beach.jpg", JPEG).unwrap();
    assert_eq!(image.owner, alice);
    assert_eq!(image.album, None);
    assert!(!image.is_favourite);
    assert!(image.tags.is_empty() && image.comments.is_empty());
    assert_eq!(image.size_bytes, JPEG.len() as i64);
    assert!(fx.engine.blobs.contains(&image.blob_id));

    let stored = fx.engine.get_image(alice, image.id).unwrap();
    assert_eq!(stored.url, image.url);
    assert_eq!(stored.name, "beach.jpg");
}

#[test]
fn test_upload_rejects_before_touching_storage() {
    let fx = Fixture::new();
    let alice = fx.user("alice");

    let err = fx.engine.upload_image(alice, "notes.txt", b"hello").unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert!(fx.engine.blobs.blobs.lock().unwrap().is_empty());
    assert!(fx.engine.list_images(alice).unwrap().is_empty());
}

#[test]
fn test_upload_failure_stores_nothing() {
    let fx = Fixture::new();
    let alice = fx.user("alice");
    fx.engine.blobs.fail_uploads.store(true, Ordering::SeqCst);

    let err = fx.engine.upload_image(alice, "beach.png", PNG).unwrap_err();
    assert!(matches!(err, EngineError::Upstream(_)));
    assert!(fx.engine.list_images(alice).unwrap().is_empty());
}

#[test]
fn test_upload_for_unknown_user_removes_blob_again() {
    let fx = Fixture::new();

    let err = fx.engine.upload_image(UserId(9999), "beach.png", PNG).unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: Entity::User, id: 9999 }));
    assert!(fx.engine.blobs.blobs.lock().unwrap().is_empty());
}

#[test]
fn test_set_favourite() {
    let fx = Fixture::new();
    let alice = fx.user("alice");
    let bob = fx.user("bob");
    let x = fx.image(alice, "x.png");
    fx.image(alice, "y.png");

    let updated = fx.engine.set_favourite(alice, x, true).unwrap();
    assert!(updated.is_favourite);
    let favourites = fx.engine.list_favourites(alice).unwrap();
    assert_eq!(favourites.iter().map(|i| i.id).collect::<Vec<_>>(), vec![x]);

    assert!(fx.engine.set_favourite(bob, x, false).unwrap_err().is_not_found());
    assert!(fx.engine.get_image(alice, x).unwrap().is_favourite);
    assert!(fx.engine.set_favourite(alice, ImageId(9999), true).unwrap_err().is_not_found());
}

// ============================================================================
// Adding and removing
// ============================================================================

#[test]
fn test_first_added_image_becomes_cover_and_stays() {
    let fx = Fixture::new();
    let u = fx.user("alice");
    let a = fx.album(u, "Holiday");
    let x = fx.image(u, "x.png");
    let y = fx.image(u, "y.png");
    let z = fx.image(u, "z.png");

    let result = fx.engine.add_images_to_album(u, a, &[x, y]).unwrap();
    assert_eq!(result.album.cover_image, Some(x));
    assert_eq!(result.updated().len(), 2);
    assert!(result.updated().iter().all(|i| i.album == Some(a)));

    let result = fx.engine.add_images_to_album(u, a, &[z]).unwrap();
    assert_eq!(result.album.cover_image, Some(x));

    // Re-running the same call is a no-op for the cover.
    let result = fx.engine.add_images_to_album(u, a, &[y, x]).unwrap();
    assert_eq!(result.album.cover_image, Some(x));
    assert_eq!(fx.album_of(u, z), Some(a));
    fx.assert_consistent();
}

#[test]
fn test_add_skips_foreign_and_missing_images() {
    let fx = Fixture::new();
    let alice = fx.user("alice");
    let bob = fx.user("bob");
    let a = fx.album(alice, "Holiday");
    let theirs = fx.image(bob, "bob.png");
    let mine = fx.image(alice, "mine.png");

    let result = fx
        .engine
        .add_images_to_album(alice, a, &[theirs, ImageId(4242), mine, mine])
        .unwrap();

    // The cover is the first id that resolved, not the first id listed.
    assert_eq!(result.album.cover_image, Some(mine));
    assert_eq!(
        result.skipped(),
        vec![
            (theirs, SkipReason::NotFound),
            (ImageId(4242), SkipReason::NotFound),
            (mine, SkipReason::Duplicate),
        ]
    );
    assert_eq!(fx.album_of(bob, theirs), None);
    fx.assert_consistent();
}

#[test]
fn test_add_with_nothing_resolving_leaves_cover_unset() {
    let fx = Fixture::new();
    let alice = fx.user("alice");
    let bob = fx.user("bob");
    let a = fx.album(alice, "Holiday");
    let theirs = fx.image(bob, "bob.png");

    let result = fx.engine.add_images_to_album(alice, a, &[theirs]).unwrap();
    assert_eq!(result.album.cover_image, None);
    assert!(result.updated().is_empty());
}

#[test]
fn test_add_requires_owned_album_and_ids() {
    let fx = Fixture::new();
    let alice = fx.user("alice");
    let bob = fx.user("bob");
    let a = fx.album(alice, "Holiday");
    let x = fx.image(bob, "x.png");

    let err = fx.engine.add_images_to_album(bob, a, &[x]).unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(fx.album_of(bob, x), None);

    let err = fx.engine.add_images_to_album(alice, a, &[]).unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[test]
fn test_moving_image_between_albums() {
    let fx = Fixture::new();
    let u = fx.user("alice");
    let a = fx.album(u, "A");
    let b = fx.album(u, "B");
    let x = fx.image(u, "x.png");

    fx.engine.add_images_to_album(u, a, &[x]).unwrap();
    fx.engine.add_images_to_album(u, b, &[x]).unwrap();
    assert_eq!(fx.album_of(u, x), Some(b));
    assert!(fx.engine.get_album(u, a).unwrap().images.is_empty());
    assert_eq!(fx.cover(u, b), Some(x));
}

#[test]
fn test_remove_images_from_album() {
    let fx = Fixture::new();
    let u = fx.user("alice");
    let a = fx.album(u, "A");
    let b = fx.album(u, "B");
    let x = fx.image(u, "x.png");
    let y = fx.image(u, "y.png");
    let stray = fx.image(u, "stray.png");
    fx.engine.add_images_to_album(u, a, &[x, y]).unwrap();
    fx.engine.add_images_to_album(u, b, &[stray]).unwrap();

    let result = fx.engine.remove_images_from_album(u, a, &[x, stray, ImageId(777)]).unwrap();
    assert_eq!(result.album_id, a);
    assert_eq!(result.updated().len(), 1);
    assert_eq!(result.updated()[0].album, None);
    assert_eq!(
        result.skipped(),
        vec![(stray, SkipReason::NotInAlbum), (ImageId(777), SkipReason::NotFound)]
    );
    assert_eq!(fx.album_of(u, stray), Some(b));
    assert_eq!(fx.album_of(u, y), Some(a));

    // Removing the cover image does not repoint the cover.
    assert_eq!(fx.cover(u, a), Some(x));
    fx.assert_consistent();
}

#[test]
fn test_remove_requires_ids_and_owned_album() {
    let fx = Fixture::new();
    let alice = fx.user("alice");
    let bob = fx.user("bob");
    let a = fx.album(alice, "A");
    let x = fx.image(alice, "x.png");
    fx.engine.add_images_to_album(alice, a, &[x]).unwrap();

    let err = fx.engine.remove_images_from_album(alice, a, &[]).unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = fx.engine.remove_images_from_album(bob, a, &[x]).unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(fx.album_of(alice, x), Some(a));
}

// ============================================================================
// Deleting images
// ============================================================================

#[test]
fn test_deleting_cover_reassigns_then_clears() {
    let fx = Fixture::new();
    let u = fx.user("alice");
    let a = fx.album(u, "A");
    let x = fx.image(u, "x.png");
    let y = fx.image(u, "y.png");
    fx.engine.add_images_to_album(u, a, &[x, y]).unwrap();
    assert_eq!(fx.cover(u, a), Some(x));

    let deleted = fx.engine.delete_image(u, x).unwrap();
    assert_eq!(deleted.id, x);
    assert!(!fx.engine.blobs.contains(&deleted.blob_id));
    assert_eq!(fx.cover(u, a), Some(y));

    fx.engine.delete_image(u, y).unwrap();
    assert_eq!(fx.cover(u, a), None);
    fx.assert_consistent();
}

#[test]
fn test_replacement_cover_is_oldest_remaining_member() {
    let fx = Fixture::new();
    let u = fx.user("alice");
    let a = fx.album(u, "A");
    let old = fx.image(u, "old.png");
    let mid = fx.image(u, "mid.png");
    let new = fx.image(u, "new.png");
    fx.engine.add_images_to_album(u, a, &[new, mid, old]).unwrap();
    assert_eq!(fx.cover(u, a), Some(new));

    fx.engine.delete_image(u, new).unwrap();
    assert_eq!(fx.cover(u, a), Some(old));
}

#[test]
fn test_deleting_cover_of_album_it_left() {
    let fx = Fixture::new();
    let u = fx.user("alice");
    let a = fx.album(u, "A");
    let x = fx.image(u, "x.png");
    let y = fx.image(u, "y.png");
    fx.engine.add_images_to_album(u, a, &[x, y]).unwrap();
    fx.engine.remove_images_from_album(u, a, &[x]).unwrap();
    assert_eq!(fx.cover(u, a), Some(x));

    // The replacement must still be filed into the album.
    fx.engine.delete_image(u, x).unwrap();
    assert_eq!(fx.cover(u, a), Some(y));
}

#[test]
fn test_deleting_image_used_as_cover_of_several_albums() {
    let fx = Fixture::new();
    let u = fx.user("alice");
    let a = fx.album(u, "A");
    let b = fx.album(u, "B");
    let x = fx.image(u, "x.png");
    let y = fx.image(u, "y.png");
    fx.engine.add_images_to_album(u, a, &[x]).unwrap();
    fx.engine.add_images_to_album(u, b, &[y]).unwrap();
    fx.engine
        .edit_album(u, b, &AlbumPatch { cover_image: Some(Some(x)), ..Default::default() })
        .unwrap();

    fx.engine.delete_image(u, x).unwrap();
    assert_eq!(fx.cover(u, a), None);
    assert_eq!(fx.cover(u, b), Some(y));
    fx.assert_consistent();
}

#[test]
fn test_delete_image_blob_failure_changes_nothing() {
    let fx = Fixture::new();
    let u = fx.user("alice");
    let a = fx.album(u, "A");
    let x = fx.image(u, "x.png");
    fx.engine.add_images_to_album(u, a, &[x]).unwrap();
    fx.engine.blobs.fail_deletes.store(true, Ordering::SeqCst);

    let err = fx.engine.delete_image(u, x).unwrap_err();
    assert!(matches!(err, EngineError::Upstream(BlobError::Delete { .. })));
    assert_eq!(fx.album_of(u, x), Some(a));
    assert_eq!(fx.cover(u, a), Some(x));
    assert_eq!(fx.pending_deletes(), 0);
}

#[test]
fn test_delete_image_retries_until_write_lock_frees() {
    let fx = Fixture::impatient(20, 10);
    let u = fx.user("alice");
    let a = fx.album(u, "A");
    let x = fx.image(u, "x.png");
    let y = fx.image(u, "y.png");
    fx.engine.add_images_to_album(u, a, &[x, y]).unwrap();

    let lock = fx.lock_db_after_next_blob_delete(Duration::from_millis(150));
    let deleted = fx.engine.delete_image(u, x).unwrap();
    assert!(lock.lock().unwrap().is_some(), "write lock was never taken");

    assert!(!fx.engine.blobs.contains(&deleted.blob_id));
    assert!(fx.engine.get_image(u, x).unwrap_err().is_not_found());
    assert_eq!(fx.cover(u, a), Some(y));
    assert_eq!(fx.pending_deletes(), 0);
    lock.lock().unwrap().take().unwrap().release();
    fx.assert_consistent();
}

#[test]
fn test_unfinished_delete_is_hidden_then_resumed() {
    let fx = Fixture::impatient(2, 1);
    let u = fx.user("alice");
    let a = fx.album(u, "A");
    let x = fx.image(u, "x.png");
    let y = fx.image(u, "y.png");
    fx.engine.add_images_to_album(u, a, &[x, y]).unwrap();
    let blob_id = fx.engine.get_image(u, x).unwrap().blob_id;

    let lock = fx.lock_db_after_next_blob_delete(Duration::from_secs(30));
    let err = fx.engine.delete_image(u, x).unwrap_err();
    assert!(err.is_transient(), "unexpected error: {err:?}");
    assert!(!fx.engine.blobs.contains(&blob_id));

    // Reads still work under the write lock, and no longer show the image.
    assert!(fx.engine.get_image(u, x).unwrap_err().is_not_found());
    let listed: Vec<ImageId> = fx.engine.list_images(u).unwrap().iter().map(|i| i.id).collect();
    assert_eq!(listed, vec![y]);
    let summary = &fx.engine.list_albums(u).unwrap()[0];
    assert_eq!(summary.cover_url, None);
    assert_eq!(fx.pending_deletes(), 1);

    lock.lock().unwrap().take().unwrap().release();

    // The blob is already gone; the second call only has to commit.
    let deleted = fx.engine.delete_image(u, x).unwrap();
    assert_eq!(deleted.id, x);
    assert_eq!(fx.cover(u, a), Some(y));
    assert_eq!(fx.pending_deletes(), 0);
    assert!(fx.engine.delete_image(u, x).unwrap_err().is_not_found());
    fx.assert_consistent();
}

#[test]
fn test_finish_pending_deletes_completes_marked_images() {
    let fx = Fixture::impatient(1, 1);
    let alice = fx.user("alice");
    let bob = fx.user("bob");
    let a = fx.album(alice, "A");
    let x = fx.image(alice, "x.png");
    let y = fx.image(alice, "y.png");
    let b = fx.image(bob, "b.png");
    fx.engine.add_images_to_album(alice, a, &[x, y]).unwrap();

    let lock = fx.lock_db_after_next_blob_delete(Duration::from_secs(30));
    assert!(fx.engine.delete_image(alice, x).is_err());

    // Still locked: the pass reports the image as blocked and keeps it marked.
    let report = fx.engine.finish_pending_deletes().unwrap();
    assert_eq!(report.finished, Vec::<ImageId>::new());
    assert_eq!(report.still_pending, vec![x]);
    assert_eq!(fx.pending_deletes(), 1);

    lock.lock().unwrap().take().unwrap().release();

    let report = fx.engine.finish_pending_deletes().unwrap();
    assert_eq!(report.finished, vec![x]);
    assert!(report.still_pending.is_empty());
    assert_eq!(fx.cover(alice, a), Some(y));
    assert!(fx.engine.get_image(bob, b).is_ok());
    assert_eq!(fx.pending_deletes(), 0);

    assert_eq!(fx.engine.finish_pending_deletes().unwrap(), PendingDeleteReport::default());
    fx.assert_consistent();
}

#[test]
fn test_marked_image_cannot_be_filed_or_made_cover() {
    let fx = Fixture::impatient(1, 1);
    let u = fx.user("alice");
    let a = fx.album(u, "A");
    let x = fx.image(u, "x.png");

    let lock = fx.lock_db_after_next_blob_delete(Duration::from_secs(30));
    assert!(fx.engine.delete_image(u, x).is_err());
    lock.lock().unwrap().take().unwrap().release();

    let result = fx.engine.add_images_to_album(u, a, &[x]).unwrap();
    assert_eq!(result.skipped(), vec![(x, SkipReason::NotFound)]);
    assert_eq!(result.album.cover_image, None);

    let patch = AlbumPatch { cover_image: Some(Some(x)), ..Default::default() };
    assert!(matches!(fx.engine.edit_album(u, a, &patch), Err(EngineError::Validation(_))));
    assert!(fx.engine.set_favourite(u, x, true).unwrap_err().is_not_found());
}

#[test]
fn test_delete_image_scoped_to_owner() {
    let fx = Fixture::new();
    let alice = fx.user("alice");
    let bob = fx.user("bob");
    let x = fx.image(alice, "x.png");

    assert!(fx.engine.delete_image(bob, x).unwrap_err().is_not_found());
    assert!(fx.engine.get_image(alice, x).is_ok());
    assert!(fx.engine.delete_image(alice, ImageId(31337)).unwrap_err().is_not_found());
}

// ============================================================================
// Albums
// ============================================================================

#[test]
fn test_delete_album_detaches_images() {
    let fx = Fixture::new();
    let u = fx.user("alice");
    let a = fx.album(u, "A");
    let x = fx.image(u, "x.png");
    let y = fx.image(u, "y.png");
    fx.engine.add_images_to_album(u, a, &[x, y]).unwrap();

    let deleted = fx.engine.delete_album(u, a).unwrap();
    assert_eq!(deleted.id, a);
    assert_eq!(fx.album_of(u, x), None);
    assert_eq!(fx.album_of(u, y), None);
    assert_eq!(fx.engine.list_images(u).unwrap().len(), 2);

    // A second delete finds nothing; the images stay unfiled.
    assert!(fx.engine.delete_album(u, a).unwrap_err().is_not_found());
    assert_eq!(fx.album_of(u, x), None);
    fx.assert_consistent();
}

#[test]
fn test_delete_album_scoped_to_owner() {
    let fx = Fixture::new();
    let alice = fx.user("alice");
    let bob = fx.user("bob");
    let a = fx.album(alice, "A");
    let x = fx.image(alice, "x.png");
    fx.engine.add_images_to_album(alice, a, &[x]).unwrap();

    assert!(fx.engine.delete_album(bob, a).unwrap_err().is_not_found());
    assert_eq!(fx.album_of(alice, x), Some(a));
}

#[test]
fn test_album_names_unique_per_owner() {
    let fx = Fixture::new();
    let alice = fx.user("alice");
    let bob = fx.user("bob");

    fx.album(alice, "Holiday");
    let err = fx.engine.create_album(alice, " Holiday ", None).unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert!(fx.engine.create_album(bob, "Holiday", None).is_ok());
    assert!(matches!(
        fx.engine.create_album(alice, "   ", None),
        Err(EngineError::Validation(_))
    ));
}

#[test]
fn test_edit_album_fields() {
    let fx = Fixture::new();
    let u = fx.user("alice");
    let a = fx.album(u, "A");
    fx.album(u, "Taken");
    let x = fx.image(u, "x.png");

    let patch = AlbumPatch {
        name: Some("Summer".to_string()),
        description: Some(Some("Two weeks by the sea".to_string())),
        cover_image: Some(Some(x)),
        shared_with: Some(vec!["friend@example.com".to_string()]),
    };
    let album = fx.engine.edit_album(u, a, &patch).unwrap();
    assert_eq!(album.name, "Summer");
    assert_eq!(album.description.as_deref(), Some("Two weeks by the sea"));
    assert_eq!(album.cover_image, Some(x));
    assert_eq!(album.shared_with, vec!["friend@example.com"]);
    assert_eq!(fx.engine.get_album(u, a).unwrap().album, album);

    let clear = AlbumPatch { cover_image: Some(None), ..Default::default() };
    assert_eq!(fx.engine.edit_album(u, a, &clear).unwrap().cover_image, None);

    let rename = AlbumPatch { name: Some("Taken".to_string()), ..Default::default() };
    assert!(matches!(fx.engine.edit_album(u, a, &rename), Err(EngineError::Validation(_))));

    // Keeping its own name is not a conflict.
    let same = AlbumPatch { name: Some("Summer".to_string()), ..Default::default() };
    assert!(fx.engine.edit_album(u, a, &same).is_ok());
}

#[test]
fn test_edit_album_trims_description() {
    let fx = Fixture::new();
    let u = fx.user("alice");
    let a = fx.engine.create_album(u, "A", Some("  first  ")).unwrap();
    assert_eq!(a.description.as_deref(), Some("first"));

    let padded = AlbumPatch {
        description: Some(Some("  by the sea ".to_string())),
        ..Default::default()
    };
    let album = fx.engine.edit_album(u, a.id, &padded).unwrap();
    assert_eq!(album.description.as_deref(), Some("by the sea"));

    let blank = AlbumPatch {
        description: Some(Some("   ".to_string())),
        ..Default::default()
    };
    assert_eq!(fx.engine.edit_album(u, a.id, &blank).unwrap().description, None);
    assert_eq!(fx.engine.get_album(u, a.id).unwrap().album.description, None);
}

#[test]
fn test_edit_album_rejects_foreign_cover() {
    let fx = Fixture::new();
    let alice = fx.user("alice");
    let bob = fx.user("bob");
    let a = fx.album(alice, "A");
    let theirs = fx.image(bob, "bob.png");

    let patch = AlbumPatch {
        name: Some("Renamed".to_string()),
        cover_image: Some(Some(theirs)),
        ..Default::default()
    };
    let err = fx.engine.edit_album(alice, a, &patch).unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    // Nothing from the rejected patch was applied.
    let album = fx.engine.get_album(alice, a).unwrap().album;
    assert_eq!(album.name, "A");
    assert_eq!(album.cover_image, None);

    assert!(fx.engine.edit_album(bob, a, &AlbumPatch::default()).unwrap_err().is_not_found());
    fx.assert_consistent();
}

#[test]
fn test_listings_are_owner_scoped() {
    let fx = Fixture::new();
    let alice = fx.user("alice");
    let bob = fx.user("bob");
    let a = fx.album(alice, "A");
    let x = fx.image(alice, "x.png");
    fx.album(bob, "B");
    fx.image(bob, "b.png");
    fx.engine.add_images_to_album(alice, a, &[x]).unwrap();

    let albums = fx.engine.list_albums(alice).unwrap();
    assert_eq!(albums.len(), 1);
    assert_eq!(albums[0].album.id, a);
    let x_url = fx.engine.get_image(alice, x).unwrap().url;
    assert_eq!(albums[0].cover_url.as_deref(), Some(x_url.as_str()));

    let images = fx.engine.list_images(alice).unwrap();
    assert!(images.iter().all(|i| i.owner == alice));
    assert_eq!(images.len(), 1);

    assert!(fx.engine.get_album(bob, a).unwrap_err().is_not_found());
    assert!(fx.engine.get_image(bob, x).unwrap_err().is_not_found());
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_adds_agree_on_one_cover() {
    let fx = Fixture::new();
    let u = fx.user("alice");
    let a = fx.album(u, "A");
    let batches: Vec<Vec<ImageId>> = (0..4)
        .map(|t| (0..3).map(|i| fx.image(u, &format!("{t}-{i}.png"))).collect())
        .collect();

    std::thread::scope(|s| {
        for batch in &batches {
            let engine = &fx.engine;
            s.spawn(move || engine.add_images_to_album(u, a, batch).unwrap());
        }
    });

    let cover = fx.cover(u, a).unwrap();
    assert!(batches.iter().any(|batch| batch[0] == cover));
    assert_eq!(fx.engine.get_album(u, a).unwrap().images.len(), 12);
    fx.assert_consistent();
}
