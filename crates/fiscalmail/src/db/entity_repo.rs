//! Entity repository: companies and people identified by tax id.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{Database, DatabaseError};

/// A known party. Owned entities are the operator's own companies.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    pub tax_id: String,
    pub name: Option<String>,
    pub owned: bool,
    pub auto_created: bool,
    pub created_at: DateTime<Utc>,
}

impl Entity {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            tax_id: row.get("tax_id")?,
            name: row.get("name")?,
            owned: row.get("owned")?,
            auto_created: row.get("auto_created")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Finds an entity by tax id.
pub fn find_by_tax_id(db: &Database, tax_id: &str) -> Result<Option<Entity>, DatabaseError> {
    db.with_conn(|conn| {
        let entity = conn
            .query_row(
                "SELECT * FROM entities WHERE tax_id = ?1",
                params![tax_id],
                Entity::from_row,
            )
            .optional()?;
        Ok(entity)
    })
}

/// Returns the entity for `tax_id`, creating it when missing.
///
/// Insert and lookup run under the same connection lock, and the unique
/// `tax_id` column keeps concurrent callers from creating two rows.
pub fn get_or_create(
    db: &Database,
    tax_id: &str,
    name: Option<&str>,
    owned: bool,
    auto_created: bool,
) -> Result<Entity, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR IGNORE INTO entities (id, tax_id, name, owned, auto_created, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                uuid::Uuid::new_v4().to_string(),
                tax_id,
                name,
                owned,
                auto_created,
                Utc::now(),
            ],
        )?;
        let entity = conn.query_row(
            "SELECT * FROM entities WHERE tax_id = ?1",
            params![tax_id],
            Entity::from_row,
        )?;
        Ok(entity)
    })
}

/// Marks the given tax ids as owned, creating entities as needed.
/// Returns the number of entities created or promoted.
pub fn seed_owned(db: &Database, tax_ids: &[String]) -> Result<u64, DatabaseError> {
    db.with_tx(|tx| {
        let mut changed = 0u64;
        for tax_id in tax_ids {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO entities (id, tax_id, name, owned, auto_created, created_at)
                 VALUES (?1, ?2, NULL, 1, 0, ?3)",
                params![uuid::Uuid::new_v4().to_string(), tax_id, Utc::now()],
            )?;
            let promoted = tx.execute(
                "UPDATE entities SET owned = 1 WHERE tax_id = ?1 AND owned = 0",
                params![tax_id],
            )?;
            changed += (inserted + promoted) as u64;
        }
        Ok(changed)
    })
}

/// Lists owned entities ordered by tax id.
pub fn list_owned(db: &Database) -> Result<Vec<Entity>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM entities WHERE owned = 1 ORDER BY tax_id")?;
        let rows = stmt
            .query_map([], Entity::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
