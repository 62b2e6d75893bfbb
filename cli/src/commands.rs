//! Subcommand handlers.

use std::sync::Arc;

use anyhow::{bail, Context};
use log::{info, warn};
use secrecy::SecretString;
use tokio::sync::{broadcast, Notify};

use fiscalmail::db::{document_repo, run_repo, settings_repo, source_repo, Database, MailboxSource};
use fiscalmail::{build_orchestrator, CredentialCipher, CycleScheduler, Settings, Trigger};

use crate::AddSource;

pub fn open_database(settings: &Settings) -> anyhow::Result<Database> {
    let path = settings
        .database_path()
        .context("No database path configured and no home directory found")?;
    Ok(Database::open(&path)?)
}

pub async fn daemon(settings: &Settings, db: Database) -> anyhow::Result<()> {
    let abandoned = run_repo::abandon_unfinished(&db, "process exited before the run finished")?;
    if abandoned > 0 {
        warn!("Marked {} interrupted runs as failed", abandoned);
    }

    let orchestrator = Arc::new(build_orchestrator(settings, db)?);
    let scheduler = CycleScheduler::new(orchestrator, settings.scheduler.tick_interval());

    let (_trigger_tx, trigger_rx) = broadcast::channel(16);
    let handle = scheduler.start(trigger_rx);
    info!(
        "Scheduler started, ticking every {} minutes",
        settings.scheduler.tick_interval_minutes
    );

    let interrupted = Arc::new(Notify::new());
    let notify = Arc::clone(&interrupted);
    ctrlc::set_handler(move || notify.notify_one()).context("Failed to set Ctrl-C handler")?;

    interrupted.notified().await;
    info!("Shutting down, waiting for the current cycle");
    scheduler.stop();
    handle.await?;
    Ok(())
}

pub async fn run(settings: &Settings, db: Database, source: Option<&str>) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(settings, db)?;
    let summary = orchestrator.run_cycle(Trigger::Manual, source).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.failed > 0 {
        bail!("{} of {} runs failed", summary.failed, summary.executed);
    }
    Ok(())
}

pub fn schedule_status(db: &Database) -> anyhow::Result<()> {
    let enabled = settings_repo::get_schedule_enabled(db)?;
    println!("Automatic polling is {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

pub fn schedule_set(db: &Database, enabled: bool) -> anyhow::Result<()> {
    settings_repo::set_schedule_enabled(db, enabled)?;
    schedule_status(db)
}

pub fn source_add(settings: &Settings, db: &Database, args: AddSource) -> anyhow::Result<()> {
    let cipher = CredentialCipher::from_settings(&settings.credentials)?;
    let sealed = cipher.seal(&args.id, &SecretString::from(args.password))?;

    let username = args.username.unwrap_or_else(|| args.address.clone());
    let mut source = MailboxSource::new(args.id, args.address, args.host, username, sealed);
    source.port = args.port;
    source.folder = args.folder;
    source.check_interval_minutes = args.interval;
    source.monitor_since = args.monitor_since;
    source.delete_after_process = args.delete_after_process;

    source.validate(settings.scheduler.min_check_interval_minutes)?;
    if source_repo::find_by_id(db, &source.id)?.is_some() {
        bail!("Source '{}' already exists", source.id);
    }
    source_repo::insert(db, &source)?;

    println!("Added source '{}' ({})", source.id, source.address);
    Ok(())
}

pub fn source_list(db: &Database) -> anyhow::Result<()> {
    let sources = source_repo::list_all(db)?;
    if sources.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    println!(
        "{:<16} {:<32} {:<8} {:<10} Last checked",
        "ID", "Address", "Active", "Interval"
    );
    println!("{}", "-".repeat(84));
    for source in sources {
        let last_checked = source
            .last_checked_at
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "Never".to_string());
        println!(
            "{:<16} {:<32} {:<8} {:<10} {}",
            source.id,
            source.address,
            if source.active { "yes" } else { "no" },
            format!("{}m", source.check_interval_minutes),
            last_checked
        );
    }
    Ok(())
}

pub fn source_remove(db: &Database, id: &str) -> anyhow::Result<()> {
    if !source_repo::delete(db, id)? {
        bail!("Source '{}' not found", id);
    }
    println!("Removed source '{}'", id);
    Ok(())
}

pub fn runs(db: &Database, source_id: &str, limit: u32) -> anyhow::Result<()> {
    let runs = run_repo::list_for_source(db, source_id, limit)?;
    if runs.is_empty() {
        println!("No runs recorded for '{}'.", source_id);
        return Ok(());
    }

    println!(
        "{:<20} {:<8} {:<7} {:>7} {:>6} {:>7} {:>5} {:>7}",
        "Started", "Status", "Trigger", "Checked", "Found", "Stored", "Dups", "Errors"
    );
    for run in runs {
        println!(
            "{:<20} {:<8} {:<7} {:>7} {:>6} {:>7} {:>5} {:>7}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.status.as_str(),
            run.triggered_by,
            run.counters.messages_checked,
            run.counters.documents_found,
            run.counters.documents_processed,
            run.counters.documents_duplicated,
            run.counters.messages_errored
        );
        if let Some(message) = &run.error_message {
            println!("    {}", message);
        }
    }
    Ok(())
}

pub fn documents(db: &Database, limit: u32) -> anyhow::Result<()> {
    let documents = document_repo::list_recent(db, limit)?;
    if documents.is_empty() {
        println!("No documents stored yet.");
        return Ok(());
    }

    println!(
        "{:<44} {:<5} {:<10} {:<11} {:>5}  {}",
        "Key", "Kind", "Direction", "Status", "Seen", "Issuer"
    );
    for doc in documents {
        println!(
            "{:<44} {:<5} {:<10} {:<11} {:>5}  {}",
            doc.content_key,
            doc.kind,
            doc.direction,
            doc.validity_status,
            doc.sightings,
            doc.issuer_name.as_deref().unwrap_or(&doc.issuer_tax_id)
        );
    }
    Ok(())
}
