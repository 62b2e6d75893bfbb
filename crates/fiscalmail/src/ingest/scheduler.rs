//! Periodic cycle scheduler.
//!
//! Fires a `Cron` cycle every tick and a `Manual` "run all" cycle whenever a
//! trigger arrives on the broadcast channel. Both funnel into
//! [`Orchestrator::run_cycle`], which owns all exclusion and gating rules.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::orchestrator::Orchestrator;
use super::summary::Trigger;

pub struct CycleScheduler {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl CycleScheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Starts the tick loop on the current tokio runtime.
    /// `trigger_rx` delivers "run all now" requests.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let shutdown = Arc::clone(&self.shutdown);
        let wake = Arc::clone(&self.wake);
        let interval = self.interval;

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval_timer.tick().await; // skip immediate first tick

            loop {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                let trigger = tokio::select! {
                    _ = interval_timer.tick() => Trigger::Cron,
                    received = trigger_rx.recv() => match received {
                        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            log::info!("Manual cycle triggered");
                            Trigger::Manual
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            log::debug!("Trigger channel closed, scheduler stopping");
                            break;
                        }
                    },
                    _ = wake.notified() => continue,
                };

                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                // A panicking cycle must not take the tick loop down with it.
                let cycle = Arc::clone(&orchestrator);
                let outcome = tokio::spawn(async move { cycle.run_cycle(trigger, None).await }).await;

                match outcome {
                    Ok(Ok(summary)) if summary.already_running => {
                        log::info!("Previous cycle still running, tick skipped");
                    }
                    Ok(Ok(summary)) => log::debug!(
                        "{} cycle: {} executed, {} failed",
                        trigger,
                        summary.executed,
                        summary.failed
                    ),
                    Ok(Err(e)) => log::error!("{} cycle failed: {}", trigger, e),
                    Err(e) => log::error!("{} cycle aborted: {}", trigger, e),
                }
            }

            log::info!("Cycle scheduler stopped");
        })
    }

    /// Signals the scheduler to stop. A cycle in flight runs to completion.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    use crate::db::{source_repo, Database, MailboxSource};
    use crate::document::{DbIdentityResolver, XmlDocumentParser};
    use crate::email::{MailboxConnector, MailboxSession};
    use crate::ingest::gate::DeduplicationGate;
    use crate::ingest::runner::{RunLimits, SourceRunner};
    use crate::storage::MemoryBlobStorage;
    use async_trait::async_trait;

    struct NoMailbox;

    #[async_trait]
    impl MailboxConnector for NoMailbox {
        async fn connect(
            &self,
            _source: &crate::db::MailboxSource,
        ) -> crate::email::error::Result<Box<dyn MailboxSession>> {
            Err(crate::email::EmailError::ConnectionFailed("offline".to_string()))
        }
    }

    /// Panics on every connect, counting the attempts.
    struct PanickingMailbox {
        connects: Arc<AtomicU32>,
    }

    #[async_trait]
    impl MailboxConnector for PanickingMailbox {
        async fn connect(
            &self,
            _source: &MailboxSource,
        ) -> crate::email::error::Result<Box<dyn MailboxSession>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            panic!("session setup blew up");
        }
    }

    fn orchestrator() -> Arc<Orchestrator> {
        orchestrator_with(Database::open_in_memory().unwrap(), Arc::new(NoMailbox))
    }

    fn orchestrator_with(db: Database, connector: Arc<dyn MailboxConnector>) -> Arc<Orchestrator> {
        let gate = DeduplicationGate::new(Arc::new(db.clone()), Arc::new(MemoryBlobStorage::new()));
        let runner = SourceRunner::new(
            db.clone(),
            connector,
            Arc::new(XmlDocumentParser::new()),
            Arc::new(DbIdentityResolver::new(db.clone())),
            gate,
            RunLimits::default(),
        );
        Arc::new(Orchestrator::new(db, Arc::new(runner), Default::default()))
    }

    #[tokio::test]
    async fn test_scheduler_stops() {
        let scheduler = CycleScheduler::new(orchestrator(), Duration::from_millis(50));
        let (_trigger_tx, trigger_rx) = broadcast::channel(16);
        let handle = scheduler.start(trigger_rx);

        tokio::time::sleep(Duration::from_millis(120)).await;
        scheduler.stop();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .expect("scheduler task panicked");
    }

    #[tokio::test]
    async fn test_closed_trigger_channel_stops_scheduler() {
        let scheduler = CycleScheduler::new(orchestrator(), Duration::from_secs(3600));
        let (trigger_tx, trigger_rx) = broadcast::channel::<()>(16);
        let handle = scheduler.start(trigger_rx);
        drop(trigger_tx);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .expect("scheduler task panicked");
    }

    #[tokio::test]
    async fn test_panicking_cycle_does_not_stop_scheduler() {
        let db = Database::open_in_memory().unwrap();
        let source = MailboxSource::new("a", "a@example.com", "imap.example.com", "a", "00");
        source_repo::insert(&db, &source).unwrap();

        let connects = Arc::new(AtomicU32::new(0));
        let orchestrator = orchestrator_with(
            db,
            Arc::new(PanickingMailbox {
                connects: connects.clone(),
            }),
        );
        let scheduler = CycleScheduler::new(orchestrator.clone(), Duration::from_secs(3600));
        let (trigger_tx, trigger_rx) = broadcast::channel(16);
        let handle = scheduler.start(trigger_rx);

        trigger_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert!(!handle.is_finished());
        assert!(!orchestrator.is_running());

        scheduler.stop();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .expect("scheduler task panicked");
    }
}
