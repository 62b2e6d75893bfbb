//! Document validation error types.

use thiserror::Error;

/// Why an attachment was not accepted as a fiscal document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    #[error("not well-formed XML: {0}")]
    Malformed(String),

    #[error("not a recognized fiscal document")]
    UnknownFamily,

    #[error("no access key found")]
    MissingKey,

    #[error("access key '{0}' is not 44 digits")]
    BadKey(String),

    #[error("protocol key {protocol} does not match document key {document}")]
    KeyMismatch { protocol: String, document: String },

    #[error("attachment is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
}

/// Errors from document validation and full parsing.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("invalid document: {0}")]
    Invalid(#[from] InvalidReason),

    #[error("failed to parse document: {0}")]
    Parse(String),
}
