//! Versioned schema scripts, recorded in `_migrations`.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// Ordered by version.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_mailbox_sources_table",
        sql: include_str!("sql/001_create_mailbox_sources.sql"),
    },
    Migration {
        version: 2,
        description: "create_seen_messages_table",
        sql: include_str!("sql/002_create_seen_messages.sql"),
    },
    Migration {
        version: 3,
        description: "create_runs_table",
        sql: include_str!("sql/003_create_runs.sql"),
    },
    Migration {
        version: 4,
        description: "create_entities_table",
        sql: include_str!("sql/004_create_entities.sql"),
    },
    Migration {
        version: 5,
        description: "create_documents_table",
        sql: include_str!("sql/005_create_documents.sql"),
    },
    Migration {
        version: 6,
        description: "create_schedule_settings_table",
        sql: include_str!("sql/006_create_schedule_settings.sql"),
    },
];

/// Applies every migration newer than the recorded schema version.
///
/// Each migration and its bookkeeping row commit together, so a failing
/// script leaves the schema at the previous version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        log::info!("Applying schema v{} ({})", migration.version, migration.description);

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            params![migration.version, migration.description],
        )?;
        tx.commit()?;
    }

    Ok(())
}
