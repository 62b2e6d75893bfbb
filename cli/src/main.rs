//! Command-line host for the fiscalmail pipeline.

mod commands;

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fiscalmail", version, about = "Fiscal document mailbox ingestion")]
struct Cli {
    /// Settings file.
    #[arg(short, long, env = "FISCALMAIL_CONFIG", default_value = "fiscalmail.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until interrupted.
    Daemon,
    /// Check mailboxes now.
    Run {
        /// Check only this source, ignoring its check interval.
        #[arg(long)]
        source: Option<String>,
    },
    /// Show or toggle automatic polling.
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
    /// Manage mailbox sources.
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },
    /// Show recent runs of a source.
    Runs {
        #[arg(long)]
        source: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show the most recently stored documents.
    Documents {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    Status,
    Enable,
    Disable,
}

#[derive(Subcommand)]
enum SourceAction {
    Add(AddSource),
    List,
    Remove { id: String },
}

#[derive(Args)]
pub struct AddSource {
    #[arg(long)]
    pub id: String,
    #[arg(long)]
    pub address: String,
    #[arg(long)]
    pub host: String,
    #[arg(long, default_value_t = 993)]
    pub port: u16,
    /// Login name; defaults to the address.
    #[arg(long)]
    pub username: Option<String>,
    #[arg(long, env = "FISCALMAIL_SOURCE_PASSWORD", hide_env_values = true)]
    pub password: String,
    #[arg(long)]
    pub folder: Option<String>,
    #[arg(long, default_value_t = 15)]
    pub interval: u32,
    /// Ignore messages received before this date (YYYY-MM-DD).
    #[arg(long)]
    pub monitor_since: Option<NaiveDate>,
    #[arg(long)]
    pub delete_after_process: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = fiscalmail::load_settings(&cli.config)?;
    fiscalmail::logging::init(&settings.logging);

    let db = commands::open_database(&settings)?;

    match cli.command {
        Command::Daemon => commands::daemon(&settings, db).await,
        Command::Run { source } => commands::run(&settings, db, source.as_deref()).await,
        Command::Schedule { action } => match action {
            ScheduleAction::Status => commands::schedule_status(&db),
            ScheduleAction::Enable => commands::schedule_set(&db, true),
            ScheduleAction::Disable => commands::schedule_set(&db, false),
        },
        Command::Source { action } => match action {
            SourceAction::Add(args) => commands::source_add(&settings, &db, args),
            SourceAction::List => commands::source_list(&db),
            SourceAction::Remove { id } => commands::source_remove(&db, &id),
        },
        Command::Runs { source, limit } => commands::runs(&db, &source, limit),
        Command::Documents { limit } => commands::documents(&db, limit),
    }
}
