//! Full parsing of accepted documents into the fields stored alongside them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::error::DocumentError;
use super::key::{ContentKey, DocumentKind};
use super::validator::{identify, ValidDocument};
use super::xml::XmlFacts;

/// A party identified by CNPJ or CPF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    pub tax_id: String,
    pub name: Option<String>,
}

/// Authorization state reported by the tax authority protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidityStatus {
    Authorized,
    Cancelled,
    Denied,
    Unknown,
}

impl ValidityStatus {
    /// Maps a `cStat` code.
    pub fn from_code(code: Option<&str>) -> Self {
        match code.map(str::trim) {
            Some("100" | "150") => ValidityStatus::Authorized,
            Some("101" | "151" | "135") => ValidityStatus::Cancelled,
            Some("110" | "301" | "302") => ValidityStatus::Denied,
            _ => ValidityStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidityStatus::Authorized => "authorized",
            ValidityStatus::Cancelled => "cancelled",
            ValidityStatus::Denied => "denied",
            ValidityStatus::Unknown => "unknown",
        }
    }
}

/// Structured record of an accepted document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedDocument {
    pub key: ContentKey,
    pub kind: DocumentKind,
    pub issuer: Party,
    pub recipient: Option<Party>,
    pub number: Option<String>,
    pub series: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub total_amount: Option<String>,
    pub status: ValidityStatus,
}

/// Turns an accepted document into a structured record.
///
/// A parse error is handled exactly like an invalid attachment.
pub trait FullParser: Send + Sync {
    fn parse(&self, document: &ValidDocument, content: &[u8]) -> Result<ParsedDocument, DocumentError>;
}

/// Field locations per family.
struct Layout {
    number: &'static [&'static str],
    recipient: &'static [&'static str],
    total: &'static [&'static str],
}

fn layout(kind: DocumentKind) -> Layout {
    match kind {
        DocumentKind::Nfe | DocumentKind::Nfce => Layout {
            number: &["ide/nNF"],
            recipient: &["dest"],
            total: &["ICMSTot/vNF"],
        },
        DocumentKind::Cte => Layout {
            number: &["ide/nCT"],
            recipient: &["dest", "rem"],
            total: &["vPrest/vTPrest"],
        },
        DocumentKind::Mdfe => Layout {
            number: &["ide/nMDF"],
            recipient: &[],
            total: &["tot/vCarga"],
        },
    }
}

/// Reads the standard SEFAZ layouts of NF-e, NFC-e, CT-e and MDF-e.
#[derive(Debug, Default, Clone)]
pub struct XmlDocumentParser;

impl XmlDocumentParser {
    pub fn new() -> Self {
        Self
    }
}

impl FullParser for XmlDocumentParser {
    fn parse(&self, document: &ValidDocument, content: &[u8]) -> Result<ParsedDocument, DocumentError> {
        let facts = XmlFacts::parse(content)?;
        let (_, key) = identify(&facts)?;
        if key != document.key {
            return Err(DocumentError::Parse(format!(
                "content key {} differs from validated key {}",
                key, document.key
            )));
        }

        let issuer = party(&facts, "emit").ok_or_else(|| {
            DocumentError::Parse("issuer (emit) has no CNPJ or CPF".to_string())
        })?;

        let fields = layout(document.kind);
        let recipient = fields.recipient.iter().find_map(|tag| party(&facts, tag));

        Ok(ParsedDocument {
            key,
            kind: document.kind,
            issuer,
            recipient,
            number: facts.first_text(fields.number).map(str::to_string),
            series: facts.text("ide/serie").map(str::to_string),
            issued_at: facts.first_text(&["ide/dhEmi", "ide/dEmi"]).and_then(parse_timestamp),
            total_amount: facts.first_text(fields.total).map(str::to_string),
            status: ValidityStatus::from_code(facts.text("infProt/cStat")),
        })
    }
}

fn party(facts: &XmlFacts, tag: &str) -> Option<Party> {
    let cnpj = format!("{}/CNPJ", tag);
    let cpf = format!("{}/CPF", tag);
    let tax_id = facts
        .first_text(&[cnpj.as_str(), cpf.as_str()])?
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>();
    if tax_id.is_empty() {
        return None;
    }
    Some(Party {
        tax_id,
        name: facts.text(&format!("{}/xNome", tag)).map(str::to_string),
    })
}

/// Accepts `dhEmi` (RFC 3339 with offset) and legacy `dEmi` (date only).
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
