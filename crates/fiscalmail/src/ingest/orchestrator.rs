//! The single entry point for every cycle, manual or scheduled.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::SchedulerSettings;
use crate::db::{settings_repo, source_repo, Database, MailboxSource};
use crate::error::{FiscalMailError, Result};

use super::runner::SourceRunner;
use super::summary::{CycleSummary, Trigger};

/// Runs cycles over the configured mailbox sources, one cycle at a time.
pub struct Orchestrator {
    db: Database,
    runner: Arc<SourceRunner>,
    settings: SchedulerSettings,
    /// Start time (epoch millis) of the cycle in flight, 0 when idle.
    cycle_started: AtomicI64,
}

/// Releases the cycle flag when dropped, unless a stale takeover replaced it.
struct CycleGuard<'a> {
    flag: &'a AtomicI64,
    token: i64,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if self
            .flag
            .compare_exchange(self.token, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Cycle flag was taken over while this cycle was running");
        }
    }
}

impl Orchestrator {
    pub fn new(db: Database, runner: Arc<SourceRunner>, settings: SchedulerSettings) -> Self {
        Self {
            db,
            runner,
            settings,
            cycle_started: AtomicI64::new(0),
        }
    }

    /// Whether a cycle is currently in flight.
    pub fn is_running(&self) -> bool {
        self.cycle_started.load(Ordering::Acquire) != 0
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn try_acquire(&self) -> Option<CycleGuard<'_>> {
        let max_cycle_ms = i64::try_from(self.settings.max_cycle().as_millis()).unwrap_or(i64::MAX);

        loop {
            let now = Utc::now().timestamp_millis().max(1);
            let current = self.cycle_started.load(Ordering::Acquire);

            if current != 0 && now.saturating_sub(current) < max_cycle_ms {
                return None;
            }
            if current != 0 {
                warn!(
                    "Cycle flag held for {}ms, taking over stale cycle",
                    now.saturating_sub(current)
                );
            }

            if self
                .cycle_started
                .compare_exchange(current, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(CycleGuard {
                    flag: &self.cycle_started,
                    token: now,
                });
            }
        }
    }

    /// Runs one cycle.
    ///
    /// - Returns at once with `already_running` set if another cycle is in flight.
    /// - A `Cron` cycle does nothing while the schedule is disabled.
    /// - Only a `Manual` cycle targeting one source bypasses the interval gate.
    pub async fn run_cycle(&self, trigger: Trigger, target: Option<&str>) -> Result<CycleSummary> {
        let Some(_guard) = self.try_acquire() else {
            info!("Cycle already running, {} trigger ignored", trigger);
            return Ok(CycleSummary::already_running(trigger));
        };

        let span = info_span!("cycle", trigger = %trigger, target = target.unwrap_or("all"));
        self.cycle(trigger, target).instrument(span).await
    }

    async fn cycle(&self, trigger: Trigger, target: Option<&str>) -> Result<CycleSummary> {
        let sources = match target {
            Some(id) => vec![source_repo::find_by_id(&self.db, id)?
                .ok_or_else(|| FiscalMailError::SourceNotFound(id.to_string()))?],
            None => source_repo::list_active(&self.db)?,
        };

        let mut summary = CycleSummary::empty(trigger);
        summary.total_sources = sources.len();

        if trigger == Trigger::Cron && !settings_repo::get_schedule_enabled(&self.db)? {
            info!("Schedule disabled, skipping {} sources", sources.len());
            summary.skipped = sources.len();
            return Ok(summary);
        }

        let now = Utc::now();
        let bypass_interval = trigger == Trigger::Manual && target.is_some();
        let min_interval = self.settings.min_check_interval_minutes;

        let (due, skipped): (Vec<MailboxSource>, Vec<MailboxSource>) =
            sources.into_iter().partition(|source| {
                source.active && (bypass_interval || source.is_due(now, min_interval))
            });
        summary.skipped = skipped.len();
        for source in &skipped {
            if !source.active {
                info!("Skipping inactive source '{}'", source.id);
            } else {
                info!("Skipping source '{}', checked recently", source.id);
            }
        }

        info!(
            "Cycle running {} of {} sources",
            due.len(),
            summary.total_sources
        );

        let runner = &self.runner;
        let concurrency = self.settings.max_concurrent_sources.max(1);
        let results: Vec<_> = stream::iter(due)
            .map(move |source| async move {
                let result = runner.run(&source, trigger).await;
                (source.id, result)
            })
            .buffered(concurrency)
            .collect()
            .await;

        for (source_id, result) in results {
            summary.executed += 1;
            match result {
                Ok(run) => {
                    if run.is_success() {
                        summary.successful += 1;
                    } else {
                        summary.failed += 1;
                    }
                    summary.runs.push(run);
                }
                Err(e) => {
                    error!("Failed to record run for source '{}': {}", source_id, e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Cycle complete: {} executed, {} skipped, {} successful, {} failed",
            summary.executed, summary.skipped, summary.successful, summary.failed
        );
        Ok(summary)
    }
}
