//! The single place that decides whether a document is new.
//!
//! The store's unique index on `content_key` is authoritative: a unique
//! violation on insert is reported as [`PersistOutcome::AlreadyExists`], the
//! same as a hit on the initial lookup.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use log::debug;
use thiserror::Error;

use crate::db::document_repo::{self, DocumentRow};
use crate::db::{Database, DatabaseError};
use crate::document::{ContentKey, DocumentKind};
use crate::storage::{BlobError, BlobStorage};

/// Result of an insert attempt against the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    DuplicateKey,
}

/// Persistence the gate needs.
pub trait DocumentStore: Send + Sync {
    fn find_by_key(&self, content_key: &str) -> Result<Option<DocumentRow>, DatabaseError>;

    fn insert(&self, document: &DocumentRow) -> Result<InsertOutcome, DatabaseError>;

    fn record_sighting(&self, content_key: &str, at: DateTime<Utc>) -> Result<(), DatabaseError>;
}

impl DocumentStore for Database {
    fn find_by_key(&self, content_key: &str) -> Result<Option<DocumentRow>, DatabaseError> {
        document_repo::find_by_key(self, content_key)
    }

    fn insert(&self, document: &DocumentRow) -> Result<InsertOutcome, DatabaseError> {
        match document_repo::insert(self, document) {
            Ok(()) => Ok(InsertOutcome::Inserted),
            Err(e) if e.is_unique_violation() => Ok(InsertOutcome::DuplicateKey),
            Err(e) => Err(e),
        }
    }

    fn record_sighting(&self, content_key: &str, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        document_repo::record_sighting(self, content_key, at).map(|_| ())
    }
}

/// Outcome of [`DeduplicationGate::try_persist`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Stored,
    AlreadyExists,
}

/// Failures that leave a document undecided.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("blob storage failed: {0}")]
    Blob(#[from] BlobError),

    #[error("document store failed: {0}")]
    Store(#[from] DatabaseError),
}

pub struct DeduplicationGate {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStorage>,
}

impl DeduplicationGate {
    pub fn new(store: Arc<dyn DocumentStore>, blobs: Arc<dyn BlobStorage>) -> Self {
        Self { store, blobs }
    }

    /// Blob key `{kind}/{yyyy}/{mm}/{key}.xml`, dated by issue month, else
    /// the month encoded in the key, else the current month.
    pub fn blob_key(kind: DocumentKind, key: &ContentKey, issued_at: Option<DateTime<Utc>>) -> String {
        let (year, month) = issued_at
            .map(|date| (date.year(), date.month()))
            .or_else(|| key.issue_month())
            .unwrap_or_else(|| {
                let now = Utc::now();
                (now.year(), now.month())
            });
        format!("{}/{:04}/{:02}/{}.xml", kind.as_str(), year, month, key)
    }

    /// Counts a sighting if `key` is already stored. Lets callers skip
    /// classification work for documents that will not be inserted.
    pub fn record_if_known(&self, key: &ContentKey) -> Result<bool, GateError> {
        if self.store.find_by_key(key.as_str())?.is_none() {
            return Ok(false);
        }
        self.store.record_sighting(key.as_str(), Utc::now())?;
        debug!("Document {} already stored", key);
        Ok(true)
    }

    /// Stores `record` and its blob unless a document with the same content
    /// key exists. `record.blob_url` is filled in here.
    pub async fn try_persist(
        &self,
        mut record: DocumentRow,
        content: &[u8],
    ) -> Result<PersistOutcome, GateError> {
        let now = Utc::now();

        if self.store.find_by_key(&record.content_key)?.is_some() {
            self.store.record_sighting(&record.content_key, now)?;
            debug!("Document {} already stored", record.content_key);
            return Ok(PersistOutcome::AlreadyExists);
        }

        record.blob_url = if self.blobs.exists(&record.blob_key).await? {
            self.blobs.url(&record.blob_key)
        } else {
            self.blobs
                .put(&record.blob_key, content, "application/xml")
                .await?
        };

        match self.store.insert(&record)? {
            InsertOutcome::Inserted => {
                debug!("Stored document {} at {}", record.content_key, record.blob_key);
                Ok(PersistOutcome::Stored)
            }
            InsertOutcome::DuplicateKey => {
                self.store.record_sighting(&record.content_key, now)?;
                debug!("Document {} stored concurrently", record.content_key);
                Ok(PersistOutcome::AlreadyExists)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::storage::MemoryBlobStorage;

    const KEY: &str = "35240311222333000181550010000001231000001234";

    fn record(key: &str) -> DocumentRow {
        let now = Utc::now();
        DocumentRow {
            id: uuid::Uuid::new_v4().to_string(),
            content_key: key.to_string(),
            kind: "nfe".to_string(),
            direction: "received".to_string(),
            validity_status: "authorized".to_string(),
            entity_id: None,
            source_id: None,
            blob_key: format!("nfe/2024/03/{}.xml", key),
            blob_url: String::new(),
            issuer_tax_id: "11222333000181".to_string(),
            issuer_name: None,
            recipient_tax_id: None,
            recipient_name: None,
            number: None,
            series: None,
            issued_at: None,
            total_amount: None,
            sightings: 1,
            first_seen_at: now,
            last_seen_at: now,
        }
    }

    /// A store whose lookup misses but whose insert hits the unique index,
    /// as when another writer wins the race between the two.
    struct RacingStore {
        sightings: Mutex<u32>,
    }

    impl DocumentStore for RacingStore {
        fn find_by_key(&self, _: &str) -> Result<Option<DocumentRow>, DatabaseError> {
            Ok(None)
        }

        fn insert(&self, _: &DocumentRow) -> Result<InsertOutcome, DatabaseError> {
            Ok(InsertOutcome::DuplicateKey)
        }

        fn record_sighting(&self, _: &str, _: DateTime<Utc>) -> Result<(), DatabaseError> {
            *self.sightings.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_second_persist_is_duplicate() {
        let db = Database::open_in_memory().unwrap();
        let blobs = Arc::new(MemoryBlobStorage::new());
        let gate = DeduplicationGate::new(Arc::new(db.clone()), blobs.clone());

        assert_eq!(gate.try_persist(record(KEY), b"<NFe/>").await.unwrap(), PersistOutcome::Stored);
        assert_eq!(
            gate.try_persist(record(KEY), b"<NFe/>").await.unwrap(),
            PersistOutcome::AlreadyExists
        );

        assert_eq!(document_repo::count(&db).unwrap(), 1);
        let stored = document_repo::find_by_key(&db, KEY).unwrap().unwrap();
        assert_eq!(stored.sightings, 2);
        assert_eq!(stored.blob_url, format!("memory://nfe/2024/03/{}.xml", KEY));
        assert_eq!(blobs.len(), 1);
    }

    #[tokio::test]
    async fn test_unique_violation_is_already_exists() {
        let store = Arc::new(RacingStore {
            sightings: Mutex::new(0),
        });
        let gate = DeduplicationGate::new(store.clone(), Arc::new(MemoryBlobStorage::new()));

        let outcome = gate.try_persist(record(KEY), b"<NFe/>").await.unwrap();
        assert_eq!(outcome, PersistOutcome::AlreadyExists);
        assert_eq!(*store.sightings.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_blob_failure_stores_nothing() {
        let db = Database::open_in_memory().unwrap();
        let blobs = Arc::new(MemoryBlobStorage::new());
        blobs.set_fail_writes(true);
        let gate = DeduplicationGate::new(Arc::new(db.clone()), blobs);

        let result = gate.try_persist(record(KEY), b"<NFe/>").await;
        assert!(matches!(result, Err(GateError::Blob(_))));
        assert_eq!(document_repo::count(&db).unwrap(), 0);
    }

    #[test]
    fn test_blob_key() {
        let key = ContentKey::parse(KEY).unwrap();
        let issued = DateTime::parse_from_rfc3339("2024-03-05T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            DeduplicationGate::blob_key(DocumentKind::Nfe, &key, Some(issued)),
            format!("nfe/2024/03/{}.xml", KEY)
        );
    }

    #[test]
    fn test_blob_key_falls_back_to_key_month() {
        let key = ContentKey::parse(KEY).unwrap();
        assert_eq!(
            DeduplicationGate::blob_key(DocumentKind::Nfe, &key, None),
            format!("nfe/2024/03/{}.xml", KEY)
        );
    }

    #[tokio::test]
    async fn test_record_if_known() {
        let db = Database::open_in_memory().unwrap();
        let gate = DeduplicationGate::new(Arc::new(db.clone()), Arc::new(MemoryBlobStorage::new()));
        let key = ContentKey::parse(KEY).unwrap();

        assert!(!gate.record_if_known(&key).unwrap());
        assert_eq!(document_repo::count(&db).unwrap(), 0);

        gate.try_persist(record(KEY), b"<NFe/>").await.unwrap();
        assert!(gate.record_if_known(&key).unwrap());

        let stored = document_repo::find_by_key(&db, KEY).unwrap().unwrap();
        assert_eq!(stored.sightings, 2);
    }
}
