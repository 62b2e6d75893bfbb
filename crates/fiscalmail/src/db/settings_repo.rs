//! Schedule settings: the single process-wide automatic polling toggle.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};

/// Returns whether automatic (cron) cycles are enabled.
pub fn get_schedule_enabled(db: &Database) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let enabled: Option<bool> = conn
            .query_row(
                "SELECT enabled FROM schedule_settings WHERE id = 1",
                [],
                |r| r.get(0),
            )
            .optional()?;
        Ok(enabled.unwrap_or(true))
    })
}

/// Enables or disables automatic cycles.
pub fn set_schedule_enabled(db: &Database, enabled: bool) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO schedule_settings (id, enabled, updated_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET enabled = excluded.enabled,
             updated_at = excluded.updated_at",
            params![enabled, Utc::now()],
        )?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enabled_by_default() {
        let db = Database::open_in_memory().unwrap();
        assert!(get_schedule_enabled(&db).unwrap());
    }

    #[test]
    fn test_toggle() {
        let db = Database::open_in_memory().unwrap();
        set_schedule_enabled(&db, false).unwrap();
        assert!(!get_schedule_enabled(&db).unwrap());
        set_schedule_enabled(&db, true).unwrap();
        assert!(get_schedule_enabled(&db).unwrap());
    }

    #[test]
    fn test_missing_row_reads_as_enabled() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute("DELETE FROM schedule_settings", [])?;
            Ok(())
        })
        .unwrap();
        assert!(get_schedule_enabled(&db).unwrap());
    }
}
