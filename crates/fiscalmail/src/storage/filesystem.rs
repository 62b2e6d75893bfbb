//! Filesystem-backed blob storage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{validate_key, BlobError, BlobStorage};

/// Stores blobs as files under a root directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never sees a partially written blob.
pub struct FilesystemBlobStorage {
    root: PathBuf,
    base_url: Option<String>,
}

impl FilesystemBlobStorage {
    pub fn new<P: AsRef<Path>>(root: P, base_url: Option<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, segment| path.join(segment)))
    }
}

#[async_trait]
impl BlobStorage for FilesystemBlobStorage {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, BlobError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobError::Write {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| BlobError::Write {
                path: tmp.clone(),
                source: e,
            })?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(BlobError::Write { path, source: e });
        }

        log::debug!("Stored blob {} ({}, {} bytes)", key, content_type, bytes.len());
        Ok(self.url(key))
    }

    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| BlobError::Read { path, source: e })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => Err(BlobError::Read { path, source: e }),
        }
    }

    fn url(&self, key: &str) -> String {
        match &self.base_url {
            Some(base) => format!("{}/{}", base, key),
            None => format!("file://{}/{}", self.root.display(), key),
        }
    }
}
