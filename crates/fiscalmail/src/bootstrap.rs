//! Wires the pipeline together from settings.

use std::sync::Arc;

use log::info;

use crate::config::Settings;
use crate::db::{entity_repo, Database};
use crate::document::{DbIdentityResolver, XmlDocumentParser};
use crate::email::{ImapConnector, MailboxConnector};
use crate::error::Result;
use crate::ingest::{DeduplicationGate, Orchestrator, RunLimits, SourceRunner};
use crate::secrets::CredentialCipher;
use crate::storage::{BlobStorage, FilesystemBlobStorage};

/// Builds the production orchestrator: IMAP mailboxes, filesystem blobs.
pub fn build_orchestrator(settings: &Settings, db: Database) -> Result<Orchestrator> {
    let cipher = Arc::new(CredentialCipher::from_settings(&settings.credentials)?);
    let connector = Arc::new(ImapConnector::new(settings.imap.clone(), cipher));
    let blobs = Arc::new(FilesystemBlobStorage::new(
        &settings.blob_directory,
        settings.blob_base_url.clone(),
    ));

    assemble(settings, db, connector, blobs)
}

/// Builds an orchestrator over the given mailbox and blob collaborators.
///
/// Seeds the configured own identities as owned entities.
pub fn assemble(
    settings: &Settings,
    db: Database,
    connector: Arc<dyn MailboxConnector>,
    blobs: Arc<dyn BlobStorage>,
) -> Result<Orchestrator> {
    let seeded = entity_repo::seed_owned(&db, &settings.own_identities)?;
    if seeded > 0 {
        info!("Registered {} own identities", seeded);
    }

    let limits = RunLimits {
        max_messages: settings.imap.max_messages_per_run,
        max_attachment_size: settings.imap.max_attachment_size,
        source_timeout: settings.scheduler.source_timeout(),
        close_timeout: settings.imap.command_timeout(),
    };
    let gate = DeduplicationGate::new(Arc::new(db.clone()), blobs);
    let runner = SourceRunner::new(
        db.clone(),
        connector,
        Arc::new(XmlDocumentParser::new()),
        Arc::new(DbIdentityResolver::new(db.clone())),
        gate,
        limits,
    );

    Ok(Orchestrator::new(
        db,
        Arc::new(runner),
        settings.scheduler.clone(),
    ))
}
