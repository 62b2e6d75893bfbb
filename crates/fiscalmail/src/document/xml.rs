//! A flat view of an XML document: element paths with their text and `Id`
//! attributes. Enough for fiscal layouts, which never repeat the fields we read.

use std::collections::HashSet;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::error::InvalidReason;

/// Text and `Id` attributes keyed by slash-separated local-name paths,
/// e.g. `nfeProc/NFe/infNFe/ide/nNF`.
#[derive(Debug, Default)]
pub struct XmlFacts {
    root: Option<String>,
    elements: HashSet<String>,
    texts: Vec<(String, String)>,
    ids: Vec<(String, String)>,
}

impl XmlFacts {
    pub fn parse(content: &[u8]) -> Result<Self, InvalidReason> {
        let mut reader = Reader::from_reader(content);
        reader.config_mut().trim_text(false);

        let mut facts = XmlFacts::default();
        let mut stack: Vec<String> = Vec::new();
        let mut text = String::new();
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    stack.push(facts.record_element(e));
                    facts.record_id(&stack, e);
                    text.clear();
                }
                Ok(Event::Empty(ref e)) => {
                    stack.push(facts.record_element(e));
                    facts.record_id(&stack, e);
                    stack.pop();
                }
                Ok(Event::Text(e)) => text.push_str(&String::from_utf8_lossy(&e)),
                Ok(Event::CData(e)) => text.push_str(&String::from_utf8_lossy(&e)),
                Ok(Event::GeneralRef(e)) => {
                    if let Some(c) = resolve_entity(&String::from_utf8_lossy(&e)) {
                        text.push(c);
                    }
                }
                Ok(Event::End(_)) => {
                    let value = text.trim();
                    if !value.is_empty() && !stack.is_empty() {
                        facts.texts.push((stack.join("/"), value.to_string()));
                    }
                    text.clear();
                    stack.pop();
                }
                Ok(Event::Eof) => {
                    if let Some(open) = stack.last() {
                        return Err(InvalidReason::Malformed(format!(
                            "element '{}' is not closed",
                            open
                        )));
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(InvalidReason::Malformed(format!(
                        "at position {}: {}",
                        reader.buffer_position(),
                        e
                    )));
                }
            }
            buf.clear();
        }

        if facts.root.is_none() {
            return Err(InvalidReason::Malformed("no root element".to_string()));
        }
        Ok(facts)
    }

    fn record_element(&mut self, e: &BytesStart<'_>) -> String {
        let name = local_name(e);
        if self.root.is_none() {
            self.root = Some(name.clone());
        }
        self.elements.insert(name.clone());
        name
    }

    fn record_id(&mut self, stack: &[String], e: &BytesStart<'_>) {
        if let Ok(Some(attr)) = e.try_get_attribute("Id") {
            let value = String::from_utf8_lossy(&attr.value).trim().to_string();
            self.ids.push((stack.join("/"), value));
        }
    }

    /// Local name of the document element.
    pub fn root(&self) -> &str {
        self.root.as_deref().unwrap_or_default()
    }

    /// Whether any element with this local name exists.
    pub fn has_element(&self, name: &str) -> bool {
        self.elements.contains(name)
    }

    /// First text value whose path ends with `suffix` (matched on whole segments).
    pub fn text(&self, suffix: &str) -> Option<&str> {
        self.texts
            .iter()
            .find(|(path, _)| ends_with_segments(path, suffix))
            .map(|(_, value)| value.as_str())
    }

    /// First non-empty text among several candidate suffixes.
    pub fn first_text(&self, suffixes: &[&str]) -> Option<&str> {
        suffixes.iter().find_map(|s| self.text(s))
    }

    /// `Id` attribute of the first element whose path ends with `suffix`.
    pub fn id_of(&self, suffix: &str) -> Option<&str> {
        self.ids
            .iter()
            .find(|(path, _)| ends_with_segments(path, suffix))
            .map(|(_, value)| value.as_str())
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn ends_with_segments(path: &str, suffix: &str) -> bool {
    path == suffix || path.ends_with(&format!("/{}", suffix))
}

fn resolve_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = name.strip_prefix('#')?;
            let value = match code.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse::<u32>().ok()?,
            };
            char::from_u32(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_and_ids() {
        let xml = br#"<?xml version="1.0"?>
            <nfeProc xmlns="http://www.portalfiscal.inf.br/nfe">
              <NFe><infNFe Id="NFe123" versao="4.00">
                <emit><CNPJ>11222333000181</CNPJ><xNome>Padaria P&amp;B</xNome></emit>
              </infNFe></NFe>
              <protNFe><infProt><chNFe>123</chNFe><cStat>100</cStat></infProt></protNFe>
            </nfeProc>"#;

        let facts = XmlFacts::parse(xml).unwrap();
        assert_eq!(facts.root(), "nfeProc");
        assert!(facts.has_element("infNFe"));
        assert!(!facts.has_element("infCte"));
        assert_eq!(facts.id_of("infNFe"), Some("NFe123"));
        assert_eq!(facts.text("emit/CNPJ"), Some("11222333000181"));
        assert_eq!(facts.text("emit/xNome"), Some("Padaria P&B"));
        assert_eq!(facts.text("infProt/cStat"), Some("100"));
        assert_eq!(facts.text("CNPJ"), Some("11222333000181"));
        assert_eq!(facts.text("mit/CNPJ"), None);
    }

    #[test]
    fn test_prefixed_elements_use_local_names() {
        let xml = br#"<ns:CTe xmlns:ns="http://www.portalfiscal.inf.br/cte"><ns:infCte Id="CTe1"/></ns:CTe>"#;
        let facts = XmlFacts::parse(xml).unwrap();
        assert_eq!(facts.root(), "CTe");
        assert_eq!(facts.id_of("CTe/infCte"), Some("CTe1"));
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(
            XmlFacts::parse(b"<NFe><infNFe></NFe>"),
            Err(InvalidReason::Malformed(_))
        ));
        assert!(matches!(
            XmlFacts::parse(b"just text"),
            Err(InvalidReason::Malformed(_))
        ));
    }
}
