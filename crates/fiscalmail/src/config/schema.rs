use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Process-wide settings for the ingestion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub version: String,

    /// SQLite database file. Defaults to `~/.fiscalmail/data/fiscalmail.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// Root directory of the filesystem blob store.
    pub blob_directory: PathBuf,

    /// Public base URL for stored blobs. When unset, `file://` URLs are returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_base_url: Option<String>,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub imap: ImapSettings,

    #[serde(default)]
    pub credentials: CredentialSettings,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Tax ids (CNPJ/CPF, digits only) of the operator's own companies.
    #[serde(default)]
    pub own_identities: Vec<String>,
}

impl Settings {
    /// Returns the configured database path, falling back to the default location.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSettings {
    /// Interval between automatic cycles, in minutes (minimum 5).
    #[serde(default = "default_tick_interval")]
    pub tick_interval_minutes: u64,

    /// Maximum duration of a single source run, in seconds.
    #[serde(default = "default_source_timeout")]
    pub source_timeout_seconds: u64,

    /// After this many minutes a still-held cycle flag is considered stale.
    #[serde(default = "default_max_cycle")]
    pub max_cycle_minutes: u64,

    /// Number of sources processed concurrently within one cycle.
    #[serde(default = "default_concurrency")]
    pub max_concurrent_sources: usize,

    /// Lower bound applied to every source's check interval.
    #[serde(default = "default_min_check_interval")]
    pub min_check_interval_minutes: u32,
}

fn default_tick_interval() -> u64 {
    5
}

fn default_source_timeout() -> u64 {
    600
}

fn default_max_cycle() -> u64 {
    120
}

fn default_concurrency() -> usize {
    1
}

fn default_min_check_interval() -> u32 {
    5
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_minutes: default_tick_interval(),
            source_timeout_seconds: default_source_timeout(),
            max_cycle_minutes: default_max_cycle(),
            max_concurrent_sources: default_concurrency(),
            min_check_interval_minutes: default_min_check_interval(),
        }
    }
}

impl SchedulerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_minutes * 60)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_seconds)
    }

    pub fn max_cycle(&self) -> Duration {
        Duration::from_secs(self.max_cycle_minutes * 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImapSettings {
    /// Folder polled on every source (default: "INBOX").
    #[serde(default = "default_inbox")]
    pub folder: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,

    /// Maximum number of messages handled per run (default: 200).
    #[serde(default = "default_max_messages")]
    pub max_messages_per_run: usize,

    /// Maximum XML attachment size in bytes (default: 10 MiB).
    #[serde(default = "default_max_attachment_size")]
    pub max_attachment_size: u64,
}

fn default_inbox() -> String {
    "INBOX".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_command_timeout() -> u64 {
    60
}

fn default_max_messages() -> usize {
    200
}

fn default_max_attachment_size() -> u64 {
    10_485_760 // 10 MiB
}

impl Default for ImapSettings {
    fn default() -> Self {
        Self {
            folder: default_inbox(),
            connect_timeout_seconds: default_connect_timeout(),
            command_timeout_seconds: default_command_timeout(),
            max_messages_per_run: default_max_messages(),
            max_attachment_size: default_max_attachment_size(),
        }
    }
}

impl ImapSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }
}

/// Where the key that encrypts stored mailbox passwords comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSettings {
    /// Direct hex key value (local development only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_insecure: Option<String>,

    /// Path to a file holding the hex key (Docker secrets).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,

    /// Environment variable holding the hex key.
    #[serde(default = "default_key_env_var")]
    pub key_env_var: Option<String>,
}

fn default_key_env_var() -> Option<String> {
    Some(crate::secrets::CREDENTIAL_KEY_ENV_VAR.to_string())
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            key_insecure: None,
            key_file: None,
            key_env_var: default_key_env_var(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}
