//! One run of one mailbox source.
//!
//! The runner owns the per-message semantics: which outcomes resolve a
//! message, when the watermark may move and what lands in the run's error
//! list. Structural failures (connect, session loss, timeout) end the run as
//! `error`; everything else is recorded and processing continues.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::db::document_repo::DocumentRow;
use crate::db::{source_repo, Database, DatabaseError, MailboxSource};
use crate::document::{classify, DocumentValidator, FullParser, IdentityResolver, InvalidReason};
use crate::email::{
    Attachment, AttachmentExtractor, MailboxConnector, MailboxSession, MessageRef, MessageTracker,
};
use crate::error::Result;

use super::gate::{DeduplicationGate, PersistOutcome};
use super::recorder::{RunHandle, RunOutcome, RunRecorder};
use super::summary::{RunSummary, Trigger};

/// Bounds applied to every run.
#[derive(Debug, Clone)]
pub struct RunLimits {
    pub max_messages: usize,
    pub max_attachment_size: u64,
    /// Maximum wall time of a run, connect to last message.
    pub source_timeout: Duration,
    /// Time granted to close the session once the run is over.
    pub close_timeout: Duration,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_messages: 200,
            max_attachment_size: 10_485_760,
            source_timeout: Duration::from_secs(600),
            close_timeout: Duration::from_secs(30),
        }
    }
}

/// Why an attachment did not end as stored or duplicated.
#[derive(Debug)]
enum AttachmentFailure {
    /// Rejected for good; the message still counts as resolved.
    Invalid(String),
    /// Persistence failed; the document is in doubt.
    Persist(String),
}

/// What processing left of one message.
#[derive(Debug)]
struct MessageResult {
    /// Every attachment ended stored, duplicated or invalid.
    resolved: bool,
    errored: bool,
    message_id: Option<String>,
}

pub struct SourceRunner {
    db: Database,
    connector: Arc<dyn MailboxConnector>,
    extractor: AttachmentExtractor,
    validator: DocumentValidator,
    parser: Arc<dyn FullParser>,
    identities: Arc<dyn IdentityResolver>,
    gate: DeduplicationGate,
    recorder: RunRecorder,
    limits: RunLimits,
}

impl SourceRunner {
    pub fn new(
        db: Database,
        connector: Arc<dyn MailboxConnector>,
        parser: Arc<dyn FullParser>,
        identities: Arc<dyn IdentityResolver>,
        gate: DeduplicationGate,
        limits: RunLimits,
    ) -> Self {
        Self {
            recorder: RunRecorder::new(db.clone()),
            db,
            connector,
            extractor: AttachmentExtractor::new(),
            validator: DocumentValidator::new(),
            parser,
            identities,
            gate,
            limits,
        }
    }

    /// Runs `source` once and finalizes its run record.
    ///
    /// Only failing to create the run record is an error; every other failure
    /// is reported through the returned summary.
    pub async fn run(
        &self,
        source: &MailboxSource,
        trigger: Trigger,
    ) -> std::result::Result<RunSummary, DatabaseError> {
        let span = info_span!("source_run", source = %source.id, trigger = %trigger);
        self.run_inner(source, trigger).instrument(span).await
    }

    async fn run_inner(
        &self,
        source: &MailboxSource,
        trigger: Trigger,
    ) -> std::result::Result<RunSummary, DatabaseError> {
        let mut run = self.recorder.begin(&source.id, trigger)?;
        info!("Run {} started for source '{}'", run.run_id(), source.id);

        let mut session: Option<Box<dyn MailboxSession>> = None;
        let processed = tokio::time::timeout(
            self.limits.source_timeout,
            self.process(source, &mut run, &mut session),
        )
        .await;

        let outcome = match processed {
            Ok(Ok(())) => RunOutcome::Success,
            Ok(Err(e)) => {
                warn!("Run {} for source '{}' failed: {}", run.run_id(), source.id, e);
                RunOutcome::Error(e.to_string())
            }
            Err(_) => {
                warn!(
                    "Run {} for source '{}' exceeded {}s",
                    run.run_id(),
                    source.id,
                    self.limits.source_timeout.as_secs()
                );
                RunOutcome::Error(format!(
                    "run timed out after {}s",
                    self.limits.source_timeout.as_secs()
                ))
            }
        };

        if let Some(mut session) = session.take() {
            match tokio::time::timeout(self.limits.close_timeout, session.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Failed to close session for '{}': {}", source.id, e),
                Err(_) => warn!("Closing session for '{}' timed out", source.id),
            }
        }

        if outcome == RunOutcome::Success {
            if let Err(e) = source_repo::update_last_checked(&self.db, &source.id, Utc::now()) {
                warn!("Failed to record last check of '{}': {}", source.id, e);
            }
        }

        let summary = run.finish(outcome);
        info!(
            "Run {} finished: {} checked, {} found, {} stored, {} duplicated, {} errors",
            summary.run_id,
            summary.counters.messages_checked,
            summary.counters.documents_found,
            summary.counters.documents_processed,
            summary.counters.documents_duplicated,
            summary.errors.len()
        );
        Ok(summary)
    }

    /// Connects and works through the pending messages. The session is left
    /// in `slot` so the caller closes it on every exit path.
    async fn process(
        &self,
        source: &MailboxSource,
        run: &mut RunHandle,
        slot: &mut Option<Box<dyn MailboxSession>>,
    ) -> Result<()> {
        let session = slot.insert(self.connector.connect(source).await?);

        let mut tracker = MessageTracker::open(self.db.clone(), source, session.uid_validity())?;
        let found = session.search(source.monitor_since).await?;
        let pending = tracker.filter_pending(found, self.limits.max_messages)?;
        debug!("{} pending messages for '{}'", pending.len(), source.id);

        // Set once a message is left unresolved; the watermark stays below it.
        let mut frozen = false;

        for message in pending {
            let raw = match session.fetch(message).await {
                Ok(raw) => raw,
                Err(e) if e.is_connection_error() => return Err(e.into()),
                Err(e) => {
                    run.message_errored();
                    run.push_error(format!("uid {}: fetch failed: {}", message.uid, e));
                    frozen = true;
                    continue;
                }
            };
            run.message_checked();

            let result = self.process_message(source, run, message, &raw.bytes).await;

            if result.errored {
                run.message_errored();
            }
            if !result.resolved {
                frozen = true;
                continue;
            }

            tracker.mark_seen(message.uid, result.message_id)?;
            if !frozen {
                tracker.advance(message.uid)?;
            }

            if source.delete_after_process && !result.errored {
                match session.delete(message).await {
                    Ok(()) => debug!("Flagged uid {} for deletion", message.uid),
                    Err(e) if e.is_connection_error() => return Err(e.into()),
                    Err(e) => run.push_error(format!("uid {}: delete failed: {}", message.uid, e)),
                }
            }
        }

        Ok(())
    }

    async fn process_message(
        &self,
        source: &MailboxSource,
        run: &mut RunHandle,
        message: MessageRef,
        raw: &[u8],
    ) -> MessageResult {
        let parsed = match self.extractor.extract(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                run.push_error(format!("uid {}: {}", message.uid, e));
                return MessageResult {
                    resolved: true,
                    errored: true,
                    message_id: None,
                };
            }
        };
        run.set_last_message(message.uid, &parsed.info);

        let mut result = MessageResult {
            resolved: true,
            errored: false,
            message_id: parsed.info.message_id.clone(),
        };

        for attachment in &parsed.attachments {
            run.document_found();
            match self.process_attachment(source, attachment).await {
                Ok(PersistOutcome::Stored) => run.document_processed(),
                Ok(PersistOutcome::AlreadyExists) => run.document_duplicated(),
                Err(AttachmentFailure::Invalid(reason)) => {
                    result.errored = true;
                    run.push_error(format!("uid {} {}: {}", message.uid, attachment.filename, reason));
                }
                Err(AttachmentFailure::Persist(reason)) => {
                    result.errored = true;
                    result.resolved = false;
                    run.push_error(format!("uid {} {}: {}", message.uid, attachment.filename, reason));
                }
            }
        }

        result
    }

    async fn process_attachment(
        &self,
        source: &MailboxSource,
        attachment: &Attachment,
    ) -> std::result::Result<PersistOutcome, AttachmentFailure> {
        let size = attachment.content.len() as u64;
        if size > self.limits.max_attachment_size {
            let reason = InvalidReason::TooLarge {
                size,
                limit: self.limits.max_attachment_size,
            };
            return Err(AttachmentFailure::Invalid(reason.to_string()));
        }

        let valid = self
            .validator
            .validate(&attachment.content)
            .map_err(|e| AttachmentFailure::Invalid(e.to_string()))?;
        if self
            .gate
            .record_if_known(&valid.key)
            .map_err(|e| AttachmentFailure::Persist(e.to_string()))?
        {
            return Ok(PersistOutcome::AlreadyExists);
        }

        let document = self
            .parser
            .parse(&valid, &attachment.content)
            .map_err(|e| AttachmentFailure::Invalid(e.to_string()))?;
        let classification = classify(self.identities.as_ref(), &document)
            .map_err(|e| AttachmentFailure::Persist(e.to_string()))?;

        let now = Utc::now();
        let record = DocumentRow {
            id: uuid::Uuid::new_v4().to_string(),
            content_key: document.key.to_string(),
            kind: document.kind.as_str().to_string(),
            direction: classification.direction.as_str().to_string(),
            validity_status: document.status.as_str().to_string(),
            entity_id: Some(classification.entity_id),
            source_id: Some(source.id.clone()),
            blob_key: DeduplicationGate::blob_key(document.kind, &document.key, document.issued_at),
            blob_url: String::new(),
            issuer_tax_id: document.issuer.tax_id,
            issuer_name: document.issuer.name,
            recipient_tax_id: document.recipient.as_ref().map(|p| p.tax_id.clone()),
            recipient_name: document.recipient.and_then(|p| p.name),
            number: document.number,
            series: document.series,
            issued_at: document.issued_at,
            total_amount: document.total_amount,
            sightings: 1,
            first_seen_at: now,
            last_seen_at: now,
        };

        self.gate
            .try_persist(record, &attachment.content)
            .await
            .map_err(|e| AttachmentFailure::Persist(e.to_string()))
    }
}
