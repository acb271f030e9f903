//! Contract for the external blob storage service holding image bytes.
//!
//! The library never talks to a storage provider directly; callers hand the
//! engine something implementing [`BlobStore`].

use serde::{Deserialize, Serialize};

/// Where an uploaded asset ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedBlob {
    pub url: String,
    pub blob_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlobError {
    #[error("upload rejected: {0}")]
    Upload(String),

    /// The provider has no blob under this id. Deleting treats this as done.
    #[error("blob {0} does not exist")]
    Missing(String),

    #[error("could not delete blob {blob_id}: {reason}")]
    Delete { blob_id: String, reason: String },

    #[error("blob storage unavailable: {0}")]
    Unavailable(String),
}

pub trait BlobStore: Send + Sync {
    fn upload(&self, file_name: &str, bytes: &[u8]) -> Result<UploadedBlob, BlobError>;

    /// Remove an asset. `Ok` means the blob is gone and the local record may
    /// follow. Implementations report an unknown id as [`BlobError::Missing`]
    /// so a delete that was interrupted halfway can be resumed.
    fn delete(&self, blob_id: &str) -> Result<(), BlobError>;
}

impl<T: BlobStore + ?Sized> BlobStore for std::sync::Arc<T> {
    fn upload(&self, file_name: &str, bytes: &[u8]) -> Result<UploadedBlob, BlobError> {
        (**self).upload(file_name, bytes)
    }

    fn delete(&self, blob_id: &str) -> Result<(), BlobError> {
        (**self).delete(blob_id)
    }
}
