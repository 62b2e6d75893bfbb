use std::path::Path;

use crate::config::schema::Settings;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/settings-v1.json");

/// Smallest tick interval accepted for the automatic cycle.
pub const MIN_TICK_INTERVAL_MINUTES: u64 = 5;

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_settings_from_str(&content)
}

pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let settings: Settings = serde_json::from_value(json_value)?;

    validate_settings(&settings)?;

    Ok(settings)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    if settings.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported settings version: {}", settings.version),
        });
    }

    let scheduler = &settings.scheduler;
    if scheduler.tick_interval_minutes < MIN_TICK_INTERVAL_MINUTES {
        return Err(ConfigError::Validation {
            message: format!(
                "scheduler.tickIntervalMinutes must be at least {} (got {})",
                MIN_TICK_INTERVAL_MINUTES, scheduler.tick_interval_minutes
            ),
        });
    }
    if scheduler.source_timeout_seconds == 0 {
        return Err(ConfigError::Validation {
            message: "scheduler.sourceTimeoutSeconds must be positive".to_string(),
        });
    }
    if scheduler.max_concurrent_sources == 0 {
        return Err(ConfigError::Validation {
            message: "scheduler.maxConcurrentSources must be at least 1".to_string(),
        });
    }
    if scheduler.min_check_interval_minutes == 0 {
        return Err(ConfigError::Validation {
            message: "scheduler.minCheckIntervalMinutes must be at least 1".to_string(),
        });
    }
    // A cycle covers several source runs, so the watchdog must outlast one of them.
    if scheduler.max_cycle().as_secs() <= scheduler.source_timeout_seconds {
        return Err(ConfigError::Validation {
            message: "scheduler.maxCycleMinutes must exceed the per-source timeout".to_string(),
        });
    }

    let imap = &settings.imap;
    if imap.connect_timeout_seconds == 0 || imap.command_timeout_seconds == 0 {
        return Err(ConfigError::Validation {
            message: "imap timeouts must be positive".to_string(),
        });
    }
    if imap.max_messages_per_run == 0 {
        return Err(ConfigError::Validation {
            message: "imap.maxMessagesPerRun must be at least 1".to_string(),
        });
    }

    for identity in &settings.own_identities {
        if !is_tax_id(identity) {
            return Err(ConfigError::Validation {
                message: format!(
                    "ownIdentities entry '{}' is not an 11 or 14 digit tax id",
                    identity
                ),
            });
        }
    }

    Ok(())
}

fn is_tax_id(value: &str) -> bool {
    (value.len() == 11 || value.len() == 14) && value.chars().all(|c| c.is_ascii_digit())
}
