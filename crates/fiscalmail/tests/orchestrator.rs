//! Cycle-level behavior: exclusion, interval gating and the global switch.

mod common;

use std::time::Duration;

use chrono::{NaiveDate, Utc};
use common::{content_key, nfe_message, Harness};
use fiscalmail::config::SchedulerSettings;
use fiscalmail::db::settings_repo;
use fiscalmail::ingest::RunLimits;
use fiscalmail::{FiscalMailError, Trigger};

fn checked_minutes_ago(minutes: i64) -> Option<chrono::DateTime<Utc>> {
    Some(Utc::now() - chrono::Duration::minutes(minutes))
}

#[tokio::test]
async fn test_overlapping_cycle_returns_immediately() {
    let harness = Harness::new();
    harness.add_source("a");
    harness.mailbox.set_connect_latency(Duration::from_millis(300));

    let orchestrator = harness.orchestrator.clone();
    let (first, second) = tokio::join!(orchestrator.run_cycle(Trigger::Cron, None), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(orchestrator.is_running());
        orchestrator.run_cycle(Trigger::Cron, None).await
    });

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.executed, 1);
    assert!(!first.already_running);
    assert_eq!(second.executed, 0);
    assert!(second.already_running);
    assert_eq!(harness.mailbox.connects(), 1);
    assert!(!orchestrator.is_running());
}

#[tokio::test]
async fn test_flag_released_after_failed_cycle() {
    let harness = Harness::new();

    let result = harness
        .orchestrator
        .run_cycle(Trigger::Manual, Some("missing"))
        .await;
    assert!(matches!(result, Err(FiscalMailError::SourceNotFound(id)) if id == "missing"));
    assert!(!harness.orchestrator.is_running());

    let summary = harness
        .orchestrator
        .run_cycle(Trigger::Cron, None)
        .await
        .unwrap();
    assert!(!summary.already_running);
}

#[tokio::test]
async fn test_recently_checked_source_is_gated() {
    let harness = Harness::new();
    harness.add_source_with("a", |s| {
        s.check_interval_minutes = 15;
        s.last_checked_at = checked_minutes_ago(5);
    });

    let cron = harness
        .orchestrator
        .run_cycle(Trigger::Cron, None)
        .await
        .unwrap();
    assert_eq!(cron.total_sources, 1);
    assert_eq!(cron.executed, 0);
    assert_eq!(cron.skipped, 1);

    let run_all = harness
        .orchestrator
        .run_cycle(Trigger::Manual, None)
        .await
        .unwrap();
    assert_eq!(run_all.executed, 0);
    assert_eq!(run_all.skipped, 1);

    let targeted = harness
        .orchestrator
        .run_cycle(Trigger::Manual, Some("a"))
        .await
        .unwrap();
    assert_eq!(targeted.executed, 1);
    assert_eq!(targeted.successful, 1);
}

#[tokio::test]
async fn test_due_source_runs_on_cron() {
    let harness = Harness::new();
    harness.add_source_with("a", |s| {
        s.check_interval_minutes = 15;
        s.last_checked_at = checked_minutes_ago(20);
    });

    let summary = harness
        .orchestrator
        .run_cycle(Trigger::Cron, None)
        .await
        .unwrap();
    assert_eq!(summary.executed, 1);
    assert_eq!(summary.runs[0].triggered_by, Trigger::Cron);
}

#[tokio::test]
async fn test_minimum_interval_applies() {
    let scheduler = SchedulerSettings {
        min_check_interval_minutes: 30,
        ..SchedulerSettings::default()
    };
    let harness = Harness::with_limits(RunLimits::default(), scheduler);
    harness.add_source_with("a", |s| {
        s.check_interval_minutes = 5;
        s.last_checked_at = checked_minutes_ago(20);
    });

    let summary = harness
        .orchestrator
        .run_cycle(Trigger::Cron, None)
        .await
        .unwrap();
    assert_eq!(summary.executed, 0);
}

#[tokio::test]
async fn test_disabled_schedule_blocks_cron_only() {
    let harness = Harness::new();
    harness.add_source("a");
    settings_repo::set_schedule_enabled(&harness.db, false).unwrap();

    let cron = harness
        .orchestrator
        .run_cycle(Trigger::Cron, None)
        .await
        .unwrap();
    assert_eq!(cron.executed, 0);
    assert_eq!(cron.skipped, 1);
    assert_eq!(harness.mailbox.connects(), 0);

    let targeted = harness
        .orchestrator
        .run_cycle(Trigger::Manual, Some("a"))
        .await
        .unwrap();
    assert_eq!(targeted.executed, 1);
    assert_eq!(harness.mailbox.connects(), 1);
}

#[tokio::test]
async fn test_inactive_sources() {
    let harness = Harness::new();
    harness.add_source("a");
    harness.add_source_with("b", |s| s.active = false);

    let summary = harness
        .orchestrator
        .run_cycle(Trigger::Manual, None)
        .await
        .unwrap();
    assert_eq!(summary.total_sources, 1);
    assert_eq!(summary.executed, 1);

    let targeted = harness
        .orchestrator
        .run_cycle(Trigger::Manual, Some("b"))
        .await
        .unwrap();
    assert_eq!(targeted.executed, 0);
    assert_eq!(targeted.skipped, 1);
}

#[tokio::test]
async fn test_first_tick_searches_from_monitor_date() {
    let harness = Harness::new();
    let since = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    harness.add_source_with("a", |s| s.monitor_since = Some(since));

    harness.mailbox.deliver(
        NaiveDate::from_ymd_opt(2023, 12, 20).unwrap(),
        nfe_message("old@x", &content_key(1)),
    );
    harness.mailbox.deliver(
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        nfe_message("new1@x", &content_key(2)),
    );
    harness.mailbox.deliver(
        NaiveDate::from_ymd_opt(2024, 2, 10).unwrap(),
        nfe_message("new2@x", &content_key(3)),
    );

    let summary = harness
        .orchestrator
        .run_cycle(Trigger::Cron, None)
        .await
        .unwrap();

    assert_eq!(harness.mailbox.searches(), vec![Some(since)]);
    assert_eq!(harness.mailbox.fetched(), vec![2, 3]);
    assert_eq!(summary.runs[0].counters.documents_processed, 2);
}

#[tokio::test]
async fn test_back_to_back_cron_ticks() {
    let harness = Harness::new();
    harness.add_source("a");
    harness.mailbox.set_connect_latency(Duration::from_millis(200));

    let orchestrator = harness.orchestrator.clone();
    let first = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run_cycle(Trigger::Cron, None).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = orchestrator.run_cycle(Trigger::Cron, None).await.unwrap();

    assert_eq!(second.executed, 0);
    assert_eq!(first.await.unwrap().unwrap().executed, 1);
}

#[tokio::test]
async fn test_failed_source_does_not_stop_cycle() {
    let scheduler = SchedulerSettings {
        max_concurrent_sources: 2,
        ..SchedulerSettings::default()
    };
    let harness = Harness::with_limits(RunLimits::default(), scheduler);
    harness.add_source("a");
    harness.add_source("b");
    harness.mailbox.fail_connect("network unreachable");

    let summary = harness
        .orchestrator
        .run_cycle(Trigger::Manual, None)
        .await
        .unwrap();

    assert_eq!(summary.executed, 2);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.successful, 0);
}
