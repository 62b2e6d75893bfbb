//! Seen message repository: per-message memory for `seen_messages`.
//!
//! Messages above the watermark that were already fully handled are kept
//! here so a frozen watermark does not cause them to be reprocessed.

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{Database, DatabaseError};

/// A seen message row.
#[derive(Debug, Clone)]
pub struct SeenMessageRow {
    pub id: String,
    pub source_id: String,
    pub uid_validity: u32,
    pub uid: u32,
    pub message_id: Option<String>,
    pub seen_at: DateTime<Utc>,
}

impl SeenMessageRow {
    pub fn new(source_id: &str, uid_validity: u32, uid: u32, message_id: Option<String>) -> Self {
        Self {
            id: make_id(source_id, uid_validity, uid),
            source_id: source_id.to_string(),
            uid_validity,
            uid,
            message_id,
            seen_at: Utc::now(),
        }
    }
}

/// Creates the row id for a message in a UID epoch.
pub fn make_id(source_id: &str, uid_validity: u32, uid: u32) -> String {
    format!("{}:{}:{}", source_id, uid_validity, uid)
}

/// Records a message as handled. Re-recording is a no-op.
pub fn insert(db: &Database, row: &SeenMessageRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR IGNORE INTO seen_messages (id, source_id, uid_validity, uid, message_id, seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.id,
                row.source_id,
                row.uid_validity,
                row.uid,
                row.message_id,
                row.seen_at,
            ],
        )?;
        Ok(())
    })
}

/// Returns the subset of `uids` already recorded for the source and epoch.
pub fn find_seen_uids(
    db: &Database,
    source_id: &str,
    uid_validity: u32,
    uids: &[u32],
) -> Result<Vec<u32>, DatabaseError> {
    if uids.is_empty() {
        return Ok(Vec::new());
    }

    db.with_conn(|conn| {
        let placeholders: Vec<String> = (0..uids.len()).map(|i| format!("?{}", i + 3)).collect();
        let sql = format!(
            "SELECT uid FROM seen_messages
             WHERE source_id = ?1 AND uid_validity = ?2 AND uid IN ({})",
            placeholders.join(", ")
        );

        let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(uids.len() + 2);
        values.push(source_id.to_string().into());
        values.push(i64::from(uid_validity).into());
        values.extend(uids.iter().map(|&uid| rusqlite::types::Value::from(i64::from(uid))));

        let mut stmt = conn.prepare(&sql)?;
        let result: Vec<u32> = stmt
            .query_map(rusqlite::params_from_iter(values), |row| row.get::<_, u32>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(result)
    })
}

/// Forgets every message recorded for a source. Returns the number of rows deleted.
pub fn delete_for_source(db: &Database, source_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count = conn.execute(
            "DELETE FROM seen_messages WHERE source_id = ?1",
            params![source_id],
        )?;
        Ok(count as u64)
    })
}

/// Counts recorded messages for a source.
pub fn count_by_source(db: &Database, source_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM seen_messages WHERE source_id = ?1",
            params![source_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
