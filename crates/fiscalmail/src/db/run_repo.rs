//! Run repository: audit records for the `runs` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::Serialize;

use super::{Database, DatabaseError};

/// Lifecycle status of a run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Provisional status written by `create`.
    Running,
    Success,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(RunStatus::Running),
            "success" => Some(RunStatus::Success),
            "error" => Some(RunStatus::Error),
            _ => None,
        }
    }
}

/// Cumulative run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCounters {
    pub messages_checked: u32,
    pub documents_found: u32,
    pub documents_processed: u32,
    pub documents_duplicated: u32,
    pub messages_errored: u32,
}

/// Metadata of the most recent message a run looked at.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub uid: Option<u32>,
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

/// A run row from the database.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRow {
    pub id: String,
    pub source_id: String,
    pub status: RunStatus,
    pub triggered_by: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub counters: RunCounters,
    pub last_message: LastMessage,
    pub error_message: Option<String>,
    pub error_detail: Vec<String>,
}

impl RunRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status: String = row.get("status")?;
        let status = RunStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown run status '{}'", status).into(),
            )
        })?;
        let detail: Option<String> = row.get("error_detail")?;
        let error_detail = match detail {
            Some(json) => serde_json::from_str(&json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
            })?,
            None => Vec::new(),
        };

        Ok(Self {
            id: row.get("id")?,
            source_id: row.get("source_id")?,
            status,
            triggered_by: row.get("triggered_by")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
            duration_ms: row.get("duration_ms")?,
            counters: RunCounters {
                messages_checked: row.get("messages_checked")?,
                documents_found: row.get("documents_found")?,
                documents_processed: row.get("documents_processed")?,
                documents_duplicated: row.get("documents_duplicated")?,
                messages_errored: row.get("messages_errored")?,
            },
            last_message: LastMessage {
                uid: row.get("last_message_uid")?,
                message_id: row.get("last_message_id")?,
                subject: row.get("last_message_subject")?,
                from: row.get("last_message_from")?,
                date: row.get("last_message_date")?,
            },
            error_message: row.get("error_message")?,
            error_detail,
        })
    }
}

/// Final state written by [`finish`].
#[derive(Debug, Clone)]
pub struct RunCompletion {
    pub status: RunStatus,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub counters: RunCounters,
    pub last_message: LastMessage,
    pub error_message: Option<String>,
    pub error_detail: Vec<String>,
}

/// Inserts a provisional `running` record.
pub fn create(
    db: &Database,
    id: &str,
    source_id: &str,
    triggered_by: &str,
    started_at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO runs (id, source_id, status, triggered_by, started_at)
             VALUES (?1, ?2, 'running', ?3, ?4)",
            params![id, source_id, triggered_by, started_at],
        )?;
        Ok(())
    })
}

/// Finalizes a running record. Returns false when the record was already
/// finalized (or does not exist); a finished run is never rewritten.
pub fn finish(db: &Database, id: &str, done: &RunCompletion) -> Result<bool, DatabaseError> {
    let detail = if done.error_detail.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&done.error_detail)?)
    };

    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE runs SET status=?2, finished_at=?3, duration_ms=?4,
             messages_checked=?5, documents_found=?6, documents_processed=?7,
             documents_duplicated=?8, messages_errored=?9,
             last_message_uid=?10, last_message_id=?11, last_message_subject=?12,
             last_message_from=?13, last_message_date=?14,
             error_message=?15, error_detail=?16
             WHERE id=?1 AND status='running'",
            params![
                id,
                done.status.as_str(),
                done.finished_at,
                done.duration_ms,
                done.counters.messages_checked,
                done.counters.documents_found,
                done.counters.documents_processed,
                done.counters.documents_duplicated,
                done.counters.messages_errored,
                done.last_message.uid,
                done.last_message.message_id,
                done.last_message.subject,
                done.last_message.from,
                done.last_message.date,
                done.error_message,
                detail,
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Finds a run by id.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<RunRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM runs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], RunRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Lists runs for a source, newest first.
pub fn list_for_source(
    db: &Database,
    source_id: &str,
    limit: u32,
) -> Result<Vec<RunRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM runs WHERE source_id = ?1
             ORDER BY started_at DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![source_id, limit], RunRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Finalizes every record still marked `running` as `error`.
///
/// Used at startup: a record left running belongs to a process that died.
pub fn abandon_unfinished(db: &Database, reason: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count = conn.execute(
            "UPDATE runs SET status='error', finished_at=?1, error_message=?2
             WHERE status='running'",
            params![Utc::now(), reason],
        )?;
        Ok(count as u64)
    })
}

/// Counts runs in a given status.
pub fn count_by_status(db: &Database, status: RunStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM runs WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
