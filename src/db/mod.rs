mod schema;
pub mod albums;
pub mod ids;
pub mod images;
pub mod scope;
pub mod users;

use anyhow::{Context, Result};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{Connection, Row, TransactionBehavior};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

pub use schema::{MIGRATIONS, SCHEMA};
pub use albums::{Album, AlbumPatch, AlbumSummary, AlbumWithImages};
pub use ids::{AlbumId, ImageId, UserId};
pub use images::{Image, NewImage};
pub use scope::OwnerScope;
pub use users::{User, UserProfile};

use crate::config::DatabaseConfig;
use crate::error::EngineResult;

/// Decode a JSON array column (tags, comments, shared_with).
pub(crate) fn json_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Counts of references that break the ownership or existence invariants.
/// All zero on a healthy library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    /// Album covers pointing at a missing image.
    pub dangling_covers: i64,
    /// Album covers pointing at another user's image.
    pub foreign_covers: i64,
    /// Images filed into a missing album.
    pub dangling_memberships: i64,
    /// Images filed into another user's album.
    pub foreign_memberships: i64,
    /// Images whose delete started but never finished. Not a violation on its
    /// own: the rows are hidden, and `Engine::finish_pending_deletes` completes them.
    pub pending_deletes: i64,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.violations() == 0
    }

    pub fn violations(&self) -> i64 {
        self.dangling_covers
            + self.foreign_covers
            + self.dangling_memberships
            + self.foreign_memberships
    }
}

/// An image whose delete started but was not committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelete {
    pub owner: UserId,
    pub image: ImageId,
    pub blob_id: String,
}

/// Shared handle to the library database. Cheap to clone; each operation
/// checks out its own pooled connection.
#[derive(Clone)]
pub struct Database {
    pool: r2d2::Pool<SqliteConnectionManager>,
}

impl Database {
    pub fn open(path: &Path, config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            let _mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            Ok(())
        });
        let pool = r2d2::Pool::builder()
            .max_size(config.pool_size.max(1))
            .build(manager)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        tracing::debug!(path = %path.display(), "Database pool ready");
        Ok(Self { pool })
    }

    pub fn initialize(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(SCHEMA)?;
        for migration in MIGRATIONS {
            if let Err(e) = conn.execute(migration, []) {
                tracing::debug!("Skipping migration: {}", e);
            }
        }
        Ok(())
    }

    /// Run `f` inside a write transaction. `BEGIN IMMEDIATE` takes SQLite's
    /// write lock up front, so check-then-set sequences inside `f` cannot
    /// interleave with another writer. Any error rolls everything back.
    pub fn write<T>(&self, f: impl FnOnce(&Connection) -> EngineResult<T>) -> EngineResult<T> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run `f` against one consistent snapshot.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> EngineResult<T>) -> EngineResult<T> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // ========================================================================
    // User operations
    // ========================================================================

    pub fn find_or_create_user(&self, profile: &UserProfile) -> EngineResult<User> {
        self.write(|conn| Ok(users::find_or_create(conn, profile)?))
    }

    pub fn get_user(&self, id: UserId) -> EngineResult<Option<User>> {
        self.read(|conn| Ok(users::find_by_id(conn, id)?))
    }

    // ========================================================================
    // Audit
    // ========================================================================

    pub fn consistency_report(&self) -> EngineResult<ConsistencyReport> {
        self.read(|conn| {
            let report = conn.query_row(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM albums a
                     WHERE a.cover_image_id IS NOT NULL
                       AND NOT EXISTS (SELECT 1 FROM images i WHERE i.id = a.cover_image_id)),
                    (SELECT COUNT(*) FROM albums a
                     JOIN images i ON i.id = a.cover_image_id
                     WHERE i.owner_id != a.owner_id),
                    (SELECT COUNT(*) FROM images i
                     WHERE i.album_id IS NOT NULL
                       AND NOT EXISTS (SELECT 1 FROM albums a WHERE a.id = i.album_id)),
                    (SELECT COUNT(*) FROM images i
                     JOIN albums a ON a.id = i.album_id
                     WHERE a.owner_id != i.owner_id),
                    (SELECT COUNT(*) FROM images WHERE deleting_at IS NOT NULL)
                "#,
                [],
                |row| {
                    Ok(ConsistencyReport {
                        dangling_covers: row.get(0)?,
                        foreign_covers: row.get(1)?,
                        dangling_memberships: row.get(2)?,
                        foreign_memberships: row.get(3)?,
                        pending_deletes: row.get(4)?,
                    })
                },
            )?;
            Ok(report)
        })
    }

    /// Every marked image across all owners, oldest mark first.
    pub fn pending_deletes(&self) -> EngineResult<Vec<PendingDelete>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT owner_id, id, blob_id FROM images
                 WHERE deleting_at IS NOT NULL
                 ORDER BY deleting_at, id",
            )?;
            let pending = stmt
                .query_map([], |row| {
                    Ok(PendingDelete {
                        owner: row.get(0)?,
                        image: row.get(1)?,
                        blob_id: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(pending)
        })
    }
}
