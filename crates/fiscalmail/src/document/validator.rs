//! Recognizes fiscal document families and extracts their content key.

use log::debug;

use super::error::InvalidReason;
use super::key::{ContentKey, DocumentKind};
use super::xml::XmlFacts;

/// Structural markers of one document family.
pub(crate) struct Family {
    /// Element carrying the `Id` attribute (`infNFe`).
    pub info: &'static str,
    /// Prefix of the `Id` attribute value (`NFe`).
    pub id_prefix: &'static str,
    /// Access key inside the authorization protocol (`infProt/chNFe`).
    pub protocol_key: &'static str,
    pub kind: DocumentKind,
}

pub(crate) const FAMILIES: &[Family] = &[
    Family {
        info: "infNFe",
        id_prefix: "NFe",
        protocol_key: "infProt/chNFe",
        kind: DocumentKind::Nfe,
    },
    Family {
        info: "infCte",
        id_prefix: "CTe",
        protocol_key: "infProt/chCTe",
        kind: DocumentKind::Cte,
    },
    Family {
        info: "infMDFe",
        id_prefix: "MDFe",
        protocol_key: "infProt/chMDFe",
        kind: DocumentKind::Mdfe,
    },
];

/// An attachment accepted as a fiscal document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidDocument {
    pub key: ContentKey,
    pub kind: DocumentKind,
}

/// Decides whether an attachment is a recognizable fiscal document.
#[derive(Debug, Default, Clone)]
pub struct DocumentValidator;

impl DocumentValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validates raw attachment content.
    pub fn validate(&self, content: &[u8]) -> Result<ValidDocument, InvalidReason> {
        let facts = XmlFacts::parse(content)?;
        let (family, key) = identify(&facts)?;
        debug!("Recognized {} document {}", family.kind, key);
        Ok(ValidDocument {
            kind: refine_kind(family.kind, &key),
            key,
        })
    }
}

/// Finds the family and validated key of a parsed document.
pub(crate) fn identify(facts: &XmlFacts) -> Result<(&'static Family, ContentKey), InvalidReason> {
    let family = FAMILIES
        .iter()
        .find(|f| facts.has_element(f.info))
        .ok_or(InvalidReason::UnknownFamily)?;

    let from_id = facts.id_of(family.info).map(|id| {
        id.strip_prefix(family.id_prefix)
            .unwrap_or(id)
            .to_string()
    });
    let from_protocol = facts.text(family.protocol_key).map(str::to_string);

    let raw = match (from_protocol, from_id) {
        (Some(protocol), Some(document)) if protocol != document => {
            return Err(InvalidReason::KeyMismatch { protocol, document });
        }
        (Some(key), _) | (None, Some(key)) => key,
        (None, None) => return Err(InvalidReason::MissingKey),
    };

    Ok((family, ContentKey::parse(&raw)?))
}

/// NF-e keys with model 65 are consumer invoices.
fn refine_kind(kind: DocumentKind, key: &ContentKey) -> DocumentKind {
    match kind {
        DocumentKind::Nfe if key.model() == "65" => DocumentKind::Nfce,
        other => other,
    }
}
