//! Content keys and document kinds.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::error::InvalidReason;

static KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{44}$").unwrap());

/// The 44-digit access key that uniquely identifies a fiscal document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ContentKey(String);

impl ContentKey {
    pub const LENGTH: usize = 44;

    /// Accepts exactly 44 ASCII digits.
    pub fn parse(value: &str) -> Result<Self, InvalidReason> {
        let value = value.trim();
        if KEY_PATTERN.is_match(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(InvalidReason::BadKey(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-digit document model encoded at positions 21-22 (55 = NF-e, 65 = NFC-e).
    pub fn model(&self) -> &str {
        &self.0[20..22]
    }

    /// Issue year and month encoded at positions 3-6 (`YYMM`), if plausible.
    pub fn issue_month(&self) -> Option<(i32, u32)> {
        let year = self.0[2..4].parse::<i32>().ok()? + 2000;
        let month = self.0[4..6].parse::<u32>().ok()?;
        (1..=12).contains(&month).then_some((year, month))
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fiscal document family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Nota Fiscal Eletrônica (model 55).
    Nfe,
    /// Nota Fiscal de Consumidor Eletrônica (model 65).
    Nfce,
    /// Conhecimento de Transporte Eletrônico.
    Cte,
    /// Manifesto Eletrônico de Documentos Fiscais.
    Mdfe,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Nfe => "nfe",
            DocumentKind::Nfce => "nfce",
            DocumentKind::Cte => "cte",
            DocumentKind::Mdfe => "mdfe",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
