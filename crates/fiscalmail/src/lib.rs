pub mod bootstrap;
pub mod config;
pub mod db;
pub mod document;
pub mod email;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod secrets;
pub mod storage;

pub use bootstrap::{assemble, build_orchestrator};
pub use config::{load_settings, Settings};
pub use db::Database;
pub use document::{ContentKey, DocumentKind, DocumentValidator, FullParser, XmlDocumentParser};
pub use email::{ImapConnector, MailboxConnector, MailboxSession};
pub use error::{ConfigError, FiscalMailError, Result};
pub use ingest::{CycleScheduler, CycleSummary, Orchestrator, RunSummary, Trigger};
pub use secrets::{resolve_secret, CredentialCipher, SecretError};
pub use storage::{BlobStorage, FilesystemBlobStorage, MemoryBlobStorage};
