//! Mailbox error types.

use thiserror::Error;

/// Errors that can occur while talking to a mailbox.
#[derive(Error, Debug)]
pub enum EmailError {
    /// Failed to reach the server.
    #[error("IMAP connection failed: {0}")]
    ConnectionFailed(String),

    /// TLS/SSL error during connection.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Stored credentials could not be decrypted.
    #[error("Credentials unavailable: {0}")]
    CredentialsUnavailable(String),

    /// IMAP protocol error.
    #[error("IMAP protocol error: {0}")]
    ProtocolError(String),

    /// Failed to parse an email message.
    #[error("Failed to parse email: {0}")]
    ParseError(String),

    /// Folder not found.
    #[error("IMAP folder '{0}' not found")]
    FolderNotFound(String),

    /// Invalid source configuration.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Operation timed out.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Database error while tracking seen messages.
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl EmailError {
    /// Whether the error means the session is unusable and the run must stop.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            EmailError::ConnectionFailed(_)
                | EmailError::TlsError(_)
                | EmailError::AuthenticationFailed(_)
                | EmailError::CredentialsUnavailable(_)
                | EmailError::FolderNotFound(_)
                | EmailError::ConfigError(_)
                | EmailError::Timeout(_)
        )
    }
}

impl From<async_native_tls::Error> for EmailError {
    fn from(err: async_native_tls::Error) -> Self {
        EmailError::TlsError(err.to_string())
    }
}

impl From<crate::db::DatabaseError> for EmailError {
    fn from(err: crate::db::DatabaseError) -> Self {
        EmailError::DatabaseError(err.to_string())
    }
}

/// Result type for mailbox operations.
pub type Result<T> = std::result::Result<T, EmailError>;
