pub mod loader;
pub mod schema;

pub use loader::{load_settings, load_settings_from_str};
pub use schema::{
    CredentialSettings, ImapSettings, LogFormat, LoggingConfig, SchedulerSettings, Settings,
};
