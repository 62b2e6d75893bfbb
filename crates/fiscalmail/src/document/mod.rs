//! Fiscal document recognition: content keys, validation, full parsing and
//! direction classification.

pub mod error;
pub mod identity;
pub mod key;
pub mod parser;
pub mod validator;
pub mod xml;

pub use error::{DocumentError, InvalidReason};
pub use identity::{classify, Classification, DbIdentityResolver, Direction, IdentityResolver};
pub use key::{ContentKey, DocumentKind};
pub use parser::{FullParser, ParsedDocument, Party, ValidityStatus, XmlDocumentParser};
pub use validator::{DocumentValidator, ValidDocument};
