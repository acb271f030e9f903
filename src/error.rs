//! Error taxonomy for library operations.

use std::fmt;

use crate::blob::BlobError;

/// Which kind of record a lookup missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User,
    Image,
    Album,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::User => "user",
            Entity::Image => "image",
            Entity::Album => "album",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The record does not exist or belongs to someone else.
    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: i64 },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("blob storage failed: {0}")]
    Upstream(#[from] BlobError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("stored list is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn not_found(entity: Entity, id: impl Into<i64>) -> Self {
        EngineError::NotFound { entity, id: id.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound { .. })
    }

    /// Faults a retry may clear (lock contention, pool exhaustion).
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            EngineError::Pool(_) => true,
            _ => false,
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
