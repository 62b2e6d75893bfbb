//! Blob storage for the raw XML of canonical documents.

pub mod filesystem;
pub mod memory;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub use filesystem::FilesystemBlobStorage;
pub use memory::MemoryBlobStorage;

/// Errors from blob storage operations.
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Invalid blob key '{0}'")]
    InvalidKey(String),

    #[error("Blob '{0}' not found")]
    NotFound(String),

    #[error("Failed to write blob '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read blob '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Blob store unavailable: {0}")]
    Unavailable(String),
}

/// Content-addressed object store.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Stores `bytes` under `key`, replacing any previous content. Returns the blob URL.
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, BlobError>;

    async fn exists(&self, key: &str) -> Result<bool, BlobError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;

    /// URL a stored blob is reachable at.
    fn url(&self, key: &str) -> String;
}

/// Rejects keys that are empty, absolute, or could escape the store root.
pub fn validate_key(key: &str) -> Result<(), BlobError> {
    let invalid = || BlobError::InvalidKey(key.to_string());

    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(invalid());
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid());
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        {
            return Err(invalid());
        }
    }
    Ok(())
}
