//! In-memory blob storage for tests and dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{validate_key, BlobError, BlobStorage};

#[derive(Default)]
pub struct MemoryBlobStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `put` fail, simulating an unavailable backend.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>, BlobError> {
        self.blobs
            .lock()
            .map_err(|_| BlobError::Unavailable("blob map lock poisoned".to_string()))
    }
}

#[async_trait]
impl BlobStorage for MemoryBlobStorage {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<String, BlobError> {
        validate_key(key)?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable(format!("write of '{}' rejected", key)));
        }
        self.lock()?.insert(key.to_string(), bytes.to_vec());
        Ok(self.url(key))
    }

    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        Ok(self.lock()?.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        self.lock()?
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }

    fn url(&self, key: &str) -> String {
        format!("memory://{}", key)
    }
}
