use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FiscalMailError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Mailbox error: {0}")]
    Email(#[from] crate::email::EmailError),

    #[error("Document error: {0}")]
    Document(#[from] crate::document::DocumentError),

    #[error("Blob storage error: {0}")]
    Blob(#[from] crate::storage::BlobError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Mailbox source '{0}' not found")]
    SourceNotFound(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Settings validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid mailbox source '{id}': {reason}")]
    InvalidSource { id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, FiscalMailError>;
