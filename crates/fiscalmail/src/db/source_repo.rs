//! Mailbox source repository: CRUD and watermark storage for `mailbox_sources`.
//!
//! The pipeline only ever writes `last_checked_at`, `last_seen_uid` and
//! `uid_validity`; everything else is owned by the admin surface.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Row};
use serde::Serialize;

use super::{Database, DatabaseError};
use crate::error::ConfigError;

/// A configured inbox to poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxSource {
    pub id: String,
    pub address: String,
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub username: String,
    /// Password encrypted with [`crate::secrets::CredentialCipher`].
    #[serde(skip_serializing)]
    pub password_ciphertext: String,
    /// Folder override; the global IMAP folder is used when unset.
    pub folder: Option<String>,
    pub active: bool,
    pub delete_after_process: bool,
    /// Messages older than this date are never fetched.
    pub monitor_since: Option<NaiveDate>,
    pub check_interval_minutes: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Highest message uid whose attachments were fully resolved.
    pub last_seen_uid: Option<u32>,
    /// UIDVALIDITY of the folder the watermark belongs to.
    pub uid_validity: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MailboxSource {
    /// Creates an active source with no pipeline state.
    pub fn new(
        id: impl Into<String>,
        address: impl Into<String>,
        host: impl Into<String>,
        username: impl Into<String>,
        password_ciphertext: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            address: address.into(),
            host: host.into(),
            port: 993,
            use_tls: true,
            username: username.into(),
            password_ciphertext: password_ciphertext.into(),
            folder: None,
            active: true,
            delete_after_process: false,
            monitor_since: None,
            check_interval_minutes: 15,
            last_checked_at: None,
            last_seen_uid: None,
            uid_validity: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the interval gate lets this source run at `now`.
    ///
    /// The effective interval is never shorter than `min_interval_minutes`.
    pub fn is_due(&self, now: DateTime<Utc>, min_interval_minutes: u32) -> bool {
        match self.last_checked_at {
            None => true,
            Some(last) => {
                let interval = self.check_interval_minutes.max(min_interval_minutes);
                now.signed_duration_since(last) >= chrono::Duration::minutes(i64::from(interval))
            }
        }
    }

    /// Checks admin-supplied fields before the source is stored.
    pub fn validate(&self, min_interval_minutes: u32) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidSource {
            id: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty".to_string()));
        }
        if !self.address.contains('@') {
            return Err(invalid(format!("'{}' is not an email address", self.address)));
        }
        if self.host.trim().is_empty() {
            return Err(invalid("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(invalid("port must not be zero".to_string()));
        }
        if self.check_interval_minutes < min_interval_minutes {
            return Err(invalid(format!(
                "checkIntervalMinutes must be at least {} (got {})",
                min_interval_minutes, self.check_interval_minutes
            )));
        }
        Ok(())
    }

    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            address: row.get("address")?,
            host: row.get("host")?,
            port: row.get("port")?,
            use_tls: row.get("use_tls")?,
            username: row.get("username")?,
            password_ciphertext: row.get("password_ciphertext")?,
            folder: row.get("folder")?,
            active: row.get("active")?,
            delete_after_process: row.get("delete_after_process")?,
            monitor_since: row.get("monitor_since")?,
            check_interval_minutes: row.get("check_interval_minutes")?,
            last_checked_at: row.get("last_checked_at")?,
            last_seen_uid: row.get("last_seen_uid")?,
            uid_validity: row.get("uid_validity")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a new source.
pub fn insert(db: &Database, source: &MailboxSource) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO mailbox_sources (id, address, host, port, use_tls, username,
             password_ciphertext, folder, active, delete_after_process, monitor_since,
             check_interval_minutes, last_checked_at, last_seen_uid, uid_validity,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                source.id,
                source.address,
                source.host,
                source.port,
                source.use_tls,
                source.username,
                source.password_ciphertext,
                source.folder,
                source.active,
                source.delete_after_process,
                source.monitor_since,
                source.check_interval_minutes,
                source.last_checked_at,
                source.last_seen_uid,
                source.uid_validity,
                source.created_at,
                source.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Updates the admin-owned fields of a source. Pipeline state is left untouched.
pub fn update(db: &Database, source: &MailboxSource) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE mailbox_sources SET address=?2, host=?3, port=?4, use_tls=?5, username=?6,
             password_ciphertext=?7, folder=?8, active=?9, delete_after_process=?10,
             monitor_since=?11, check_interval_minutes=?12, updated_at=?13
             WHERE id=?1",
            params![
                source.id,
                source.address,
                source.host,
                source.port,
                source.use_tls,
                source.username,
                source.password_ciphertext,
                source.folder,
                source.active,
                source.delete_after_process,
                source.monitor_since,
                source.check_interval_minutes,
                Utc::now(),
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Finds a source by id.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<MailboxSource>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM mailbox_sources WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], MailboxSource::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Lists every source ordered by id.
pub fn list_all(db: &Database) -> Result<Vec<MailboxSource>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM mailbox_sources ORDER BY id")?;
        let rows = stmt
            .query_map([], MailboxSource::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists active sources ordered by id.
pub fn list_active(db: &Database) -> Result<Vec<MailboxSource>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM mailbox_sources WHERE active = 1 ORDER BY id")?;
        let rows = stmt
            .query_map([], MailboxSource::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes a source (admin operation). Returns whether a row was removed.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count = conn.execute("DELETE FROM mailbox_sources WHERE id = ?1", params![id])?;
        Ok(count > 0)
    })
}

/// Advances the watermark to `uid`. The stored value never decreases:
/// returns false when the stored watermark is already at or past `uid`.
pub fn advance_watermark(db: &Database, id: &str, uid: u32) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE mailbox_sources SET last_seen_uid = ?2
             WHERE id = ?1 AND (last_seen_uid IS NULL OR last_seen_uid < ?2)",
            params![id, uid],
        )?;
        Ok(changed > 0)
    })
}

/// Records the completion time of a successful run.
pub fn update_last_checked(
    db: &Database,
    id: &str,
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE mailbox_sources SET last_checked_at = ?2 WHERE id = ?1",
            params![id, at],
        )?;
        Ok(())
    })
}

/// Starts a new UID epoch: stores the folder's UIDVALIDITY and clears the watermark.
pub fn reset_uid_epoch(db: &Database, id: &str, uid_validity: u32) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE mailbox_sources SET uid_validity = ?2, last_seen_uid = NULL WHERE id = ?1",
            params![id, uid_validity],
        )?;
        Ok(())
    })
}
