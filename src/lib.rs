//! PixBloom photo library backend.
//!
//! Users upload images, file them into albums, mark favourites and pick album
//! covers. [`engine::Engine`] is the entry point; it keeps album covers and
//! image memberships consistent across adds, removals and deletes, and scopes
//! every operation to the calling user.

pub mod blob;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod upload;

pub use blob::{BlobError, BlobStore, UploadedBlob};
pub use config::Config;
pub use db::{Album, AlbumId, AlbumPatch, Database, Image, ImageId, UserId};
pub use engine::Engine;
pub use error::{EngineError, EngineResult, Entity};
