//! Direction classification against the operator's own entities.

use serde::Serialize;

use crate::db::entity_repo::{self, Entity};
use crate::db::{Database, DatabaseError};

use super::parser::{ParsedDocument, Party};

/// Which side of the document the operator is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Issued,
    Received,
    ThirdParty,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Issued => "issued",
            Direction::Received => "received",
            Direction::ThirdParty => "third_party",
        }
    }
}

/// Outcome of classifying one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub direction: Direction,
    pub entity_id: String,
}

/// Looks up and provisions entities by tax id.
pub trait IdentityResolver: Send + Sync {
    fn find_entity(&self, tax_id: &str) -> Result<Option<Entity>, DatabaseError>;

    /// Returns the entity for `party`, creating it (flagged auto-created) if unknown.
    fn resolve_or_create(&self, party: &Party, owned: bool) -> Result<Entity, DatabaseError>;
}

/// [`IdentityResolver`] backed by the `entities` table.
#[derive(Clone)]
pub struct DbIdentityResolver {
    db: Database,
}

impl DbIdentityResolver {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl IdentityResolver for DbIdentityResolver {
    fn find_entity(&self, tax_id: &str) -> Result<Option<Entity>, DatabaseError> {
        entity_repo::find_by_tax_id(&self.db, tax_id)
    }

    fn resolve_or_create(&self, party: &Party, owned: bool) -> Result<Entity, DatabaseError> {
        entity_repo::get_or_create(&self.db, &party.tax_id, party.name.as_deref(), owned, true)
    }
}

/// Classifies a document:
/// - issuer owned: `issued`
/// - recipient owned: `received`
/// - recipient unknown: provisioned as owned, `received`
/// - recipient known but not owned, or no recipient: `third_party`,
///   attached to the issuer's entity
pub fn classify(
    resolver: &dyn IdentityResolver,
    document: &ParsedDocument,
) -> Result<Classification, DatabaseError> {
    if let Some(issuer) = resolver.find_entity(&document.issuer.tax_id)? {
        if issuer.owned {
            return Ok(Classification {
                direction: Direction::Issued,
                entity_id: issuer.id,
            });
        }
    }

    if let Some(recipient) = &document.recipient {
        match resolver.find_entity(&recipient.tax_id)? {
            Some(entity) if entity.owned => {
                return Ok(Classification {
                    direction: Direction::Received,
                    entity_id: entity.id,
                });
            }
            Some(_) => {}
            None => {
                log::info!(
                    "Provisioning owned entity for unknown recipient {}",
                    recipient.tax_id
                );
                let entity = resolver.resolve_or_create(recipient, true)?;
                return Ok(Classification {
                    direction: Direction::Received,
                    entity_id: entity.id,
                });
            }
        }
    }

    let issuer = resolver.resolve_or_create(&document.issuer, false)?;
    Ok(Classification {
        direction: Direction::ThirdParty,
        entity_id: issuer.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ContentKey, DocumentKind, ValidityStatus};

    fn document(issuer: &str, recipient: Option<&str>) -> ParsedDocument {
        ParsedDocument {
            key: ContentKey::parse("35240311222333000181550010000001231000001234").unwrap(),
            kind: DocumentKind::Nfe,
            issuer: Party {
                tax_id: issuer.to_string(),
                name: Some("Emitente".to_string()),
            },
            recipient: recipient.map(|r| Party {
                tax_id: r.to_string(),
                name: Some("Destinatario".to_string()),
            }),
            number: None,
            series: None,
            issued_at: None,
            total_amount: None,
            status: ValidityStatus::Authorized,
        }
    }

    fn resolver() -> (Database, DbIdentityResolver) {
        let db = Database::open_in_memory().unwrap();
        entity_repo::seed_owned(&db, &["11222333000181".to_string()]).unwrap();
        (db.clone(), DbIdentityResolver::new(db))
    }

    #[test]
    fn test_issued_by_owned_entity() {
        let (_db, resolver) = resolver();
        let c = classify(&resolver, &document("11222333000181", Some("99888777000166"))).unwrap();
        assert_eq!(c.direction, Direction::Issued);
    }

    #[test]
    fn test_received_by_owned_entity() {
        let (db, resolver) = resolver();
        let c = classify(&resolver, &document("99888777000166", Some("11222333000181"))).unwrap();
        assert_eq!(c.direction, Direction::Received);
        let owned = entity_repo::find_by_tax_id(&db, "11222333000181").unwrap().unwrap();
        assert_eq!(c.entity_id, owned.id);
    }

    #[test]
    fn test_unknown_recipient_is_provisioned() {
        let (db, resolver) = resolver();
        let c = classify(&resolver, &document("99888777000166", Some("12345678909"))).unwrap();
        assert_eq!(c.direction, Direction::Received);

        let created = entity_repo::find_by_tax_id(&db, "12345678909").unwrap().unwrap();
        assert!(created.owned);
        assert!(created.auto_created);
        assert_eq!(created.name.as_deref(), Some("Destinatario"));
        assert_eq!(c.entity_id, created.id);
    }

    #[test]
    fn test_no_recipient_is_third_party() {
        let (db, resolver) = resolver();
        let c = classify(&resolver, &document("99888777000166", None)).unwrap();
        assert_eq!(c.direction, Direction::ThirdParty);

        let issuer = entity_repo::find_by_tax_id(&db, "99888777000166").unwrap().unwrap();
        assert!(!issuer.owned);
        assert_eq!(c.entity_id, issuer.id);
    }

    #[test]
    fn test_known_foreign_recipient_is_third_party() {
        let (db, resolver) = resolver();
        // Provisioned as a non-owned issuer by an earlier third-party document.
        classify(&resolver, &document("55444333000122", None)).unwrap();

        let c = classify(&resolver, &document("99888777000166", Some("55444333000122"))).unwrap();
        assert_eq!(c.direction, Direction::ThirdParty);

        let recipient = entity_repo::find_by_tax_id(&db, "55444333000122").unwrap().unwrap();
        assert!(!recipient.owned);
        let issuer = entity_repo::find_by_tax_id(&db, "99888777000166").unwrap().unwrap();
        assert!(!issuer.owned);
        assert_eq!(c.entity_id, issuer.id);
    }
}
