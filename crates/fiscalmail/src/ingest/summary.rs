//! Payloads returned to callers of a cycle.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::run_repo::{RunCounters, RunStatus};

/// What started a cycle. Recorded on every run for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Manual,
    Cron,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Manual => "manual",
            Trigger::Cron => "cron",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one source run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub source_id: String,
    pub status: RunStatus,
    pub triggered_by: Trigger,
    #[serde(flatten)]
    pub counters: RunCounters,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Outcome of one orchestrator cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub trigger: Trigger,
    pub total_sources: usize,
    pub executed: usize,
    pub skipped: usize,
    pub successful: usize,
    pub failed: usize,
    /// Set when another cycle held the lock and nothing was done.
    pub already_running: bool,
    pub runs: Vec<RunSummary>,
}

impl CycleSummary {
    pub fn empty(trigger: Trigger) -> Self {
        Self {
            trigger,
            total_sources: 0,
            executed: 0,
            skipped: 0,
            successful: 0,
            failed: 0,
            already_running: false,
            runs: Vec::new(),
        }
    }

    pub fn already_running(trigger: Trigger) -> Self {
        Self {
            already_running: true,
            ..Self::empty(trigger)
        }
    }
}
