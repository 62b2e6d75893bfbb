//! Run audit records.
//!
//! [`RunRecorder::begin`] writes a provisional record; the returned
//! [`RunHandle`] accumulates counters and is finalized exactly once, either
//! by [`RunHandle::finish`] or, if it is dropped unfinished, as an error.

use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{error, warn};

use crate::db::run_repo::{self, LastMessage, RunCompletion, RunCounters, RunStatus};
use crate::db::{Database, DatabaseError};
use crate::email::MessageInfo;

use super::summary::{RunSummary, Trigger};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// Structural failure (connection, timeout); the message becomes `error_message`.
    Error(String),
}

/// Creates run records.
#[derive(Clone)]
pub struct RunRecorder {
    db: Database,
}

impl RunRecorder {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persists a provisional `running` record and returns its handle.
    pub fn begin(&self, source_id: &str, trigger: Trigger) -> Result<RunHandle, DatabaseError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        run_repo::create(&self.db, &run_id, source_id, trigger.as_str(), started_at)?;

        Ok(RunHandle {
            db: self.db.clone(),
            run_id,
            source_id: source_id.to_string(),
            trigger,
            started_at,
            started: Instant::now(),
            counters: RunCounters::default(),
            errors: Vec::new(),
            last_message: LastMessage::default(),
            finished: false,
        })
    }
}

/// An in-progress run. Counters only ever grow.
pub struct RunHandle {
    db: Database,
    run_id: String,
    source_id: String,
    trigger: Trigger,
    started_at: DateTime<Utc>,
    started: Instant,
    counters: RunCounters,
    errors: Vec<String>,
    last_message: LastMessage,
    finished: bool,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn counters(&self) -> RunCounters {
        self.counters
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn message_checked(&mut self) {
        self.counters.messages_checked += 1;
    }

    pub fn document_found(&mut self) {
        self.counters.documents_found += 1;
    }

    pub fn document_processed(&mut self) {
        self.counters.documents_processed += 1;
    }

    pub fn document_duplicated(&mut self) {
        self.counters.documents_duplicated += 1;
    }

    pub fn message_errored(&mut self) {
        self.counters.messages_errored += 1;
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("Run {}: {}", self.run_id, message);
        self.errors.push(message);
    }

    pub fn set_last_message(&mut self, uid: u32, info: &MessageInfo) {
        self.last_message = LastMessage {
            uid: Some(uid),
            message_id: info.message_id.clone(),
            subject: info.subject.clone(),
            from: info.from.clone(),
            date: info.date,
        };
    }

    /// Finalizes the record and returns the caller-facing summary.
    pub fn finish(mut self, outcome: RunOutcome) -> RunSummary {
        self.finalize(outcome)
    }

    fn finalize(&mut self, outcome: RunOutcome) -> RunSummary {
        self.finished = true;

        let (status, error_message) = match outcome {
            RunOutcome::Success => (RunStatus::Success, None),
            RunOutcome::Error(message) => (RunStatus::Error, Some(message)),
        };
        let finished_at = Utc::now();
        let duration_ms = i64::try_from(self.started.elapsed().as_millis()).unwrap_or(i64::MAX);

        let completion = RunCompletion {
            status,
            finished_at,
            duration_ms,
            counters: self.counters,
            last_message: self.last_message.clone(),
            error_message: error_message.clone(),
            error_detail: self.errors.clone(),
        };
        match run_repo::finish(&self.db, &self.run_id, &completion) {
            Ok(true) => {}
            Ok(false) => warn!("Run {} was already finalized", self.run_id),
            Err(e) => error!("Failed to finalize run {}: {}", self.run_id, e),
        }

        RunSummary {
            run_id: self.run_id.clone(),
            source_id: self.source_id.clone(),
            status,
            triggered_by: self.trigger,
            counters: self.counters,
            errors: std::mem::take(&mut self.errors),
            error_message,
            started_at: self.started_at,
            finished_at,
            duration_ms,
        }
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if !self.finished {
            self.finalize(RunOutcome::Error("run aborted".to_string()));
        }
    }
}
