//! Document repository: canonical fiscal documents keyed by content key.
//!
//! `content_key` carries a unique index; [`insert`] surfaces a duplicate as a
//! constraint violation which callers detect with
//! [`DatabaseError::is_unique_violation`].

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{Database, DatabaseError};

/// A canonical document row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRow {
    pub id: String,
    pub content_key: String,
    pub kind: String,
    pub direction: String,
    pub validity_status: String,
    pub entity_id: Option<String>,
    pub source_id: Option<String>,
    pub blob_key: String,
    pub blob_url: String,
    pub issuer_tax_id: String,
    pub issuer_name: Option<String>,
    pub recipient_tax_id: Option<String>,
    pub recipient_name: Option<String>,
    pub number: Option<String>,
    pub series: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub total_amount: Option<String>,
    pub sightings: u32,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl DocumentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            content_key: row.get("content_key")?,
            kind: row.get("kind")?,
            direction: row.get("direction")?,
            validity_status: row.get("validity_status")?,
            entity_id: row.get("entity_id")?,
            source_id: row.get("source_id")?,
            blob_key: row.get("blob_key")?,
            blob_url: row.get("blob_url")?,
            issuer_tax_id: row.get("issuer_tax_id")?,
            issuer_name: row.get("issuer_name")?,
            recipient_tax_id: row.get("recipient_tax_id")?,
            recipient_name: row.get("recipient_name")?,
            number: row.get("number")?,
            series: row.get("series")?,
            issued_at: row.get("issued_at")?,
            total_amount: row.get("total_amount")?,
            sightings: row.get("sightings")?,
            first_seen_at: row.get("first_seen_at")?,
            last_seen_at: row.get("last_seen_at")?,
        })
    }
}

/// Inserts a new document. Fails with a unique violation when the content
/// key is already stored.
pub fn insert(db: &Database, doc: &DocumentRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO documents (id, content_key, kind, direction, validity_status,
             entity_id, source_id, blob_key, blob_url, issuer_tax_id, issuer_name,
             recipient_tax_id, recipient_name, number, series, issued_at, total_amount,
             sightings, first_seen_at, last_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
             ?16, ?17, ?18, ?19, ?20)",
            params![
                doc.id,
                doc.content_key,
                doc.kind,
                doc.direction,
                doc.validity_status,
                doc.entity_id,
                doc.source_id,
                doc.blob_key,
                doc.blob_url,
                doc.issuer_tax_id,
                doc.issuer_name,
                doc.recipient_tax_id,
                doc.recipient_name,
                doc.number,
                doc.series,
                doc.issued_at,
                doc.total_amount,
                doc.sightings,
                doc.first_seen_at,
                doc.last_seen_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a document by content key.
pub fn find_by_key(db: &Database, content_key: &str) -> Result<Option<DocumentRow>, DatabaseError> {
    db.with_conn(|conn| {
        let doc = conn
            .query_row(
                "SELECT * FROM documents WHERE content_key = ?1",
                params![content_key],
                DocumentRow::from_row,
            )
            .optional()?;
        Ok(doc)
    })
}

/// Counts one more sighting of an existing document.
pub fn record_sighting(
    db: &Database,
    content_key: &str,
    at: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE documents SET sightings = sightings + 1, last_seen_at = ?2
             WHERE content_key = ?1",
            params![content_key, at],
        )?;
        Ok(changed > 0)
    })
}

/// Lists the most recently first-seen documents.
pub fn list_recent(db: &Database, limit: u32) -> Result<Vec<DocumentRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM documents ORDER BY first_seen_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], DocumentRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts stored documents.
pub fn count(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
        Ok(count)
    })
}
