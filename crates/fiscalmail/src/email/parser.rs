//! Message parsing and XML attachment extraction.

use chrono::{DateTime, Utc};
use log::debug;
use mail_parser::{Message, MessageParser, MimeHeaders, PartType};

use super::error::{EmailError, Result};

/// Header metadata of a parsed message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageInfo {
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

/// A candidate fiscal document attached to a message.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Sanitized filename.
    pub filename: String,
    pub content: Vec<u8>,
}

/// A message reduced to what ingestion needs.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub info: MessageInfo,
    /// XML attachments in message order.
    pub attachments: Vec<Attachment>,
}

/// Splits raw messages into header metadata and `.xml` attachments.
///
/// Attachments with any other extension are dropped without a trace.
#[derive(Debug, Default, Clone)]
pub struct AttachmentExtractor;

impl AttachmentExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Parses a raw RFC 822 message.
    pub fn extract(&self, raw: &[u8]) -> Result<ParsedMessage> {
        let message = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| EmailError::ParseError("Failed to parse email message".to_string()))?;

        let info = message_info(&message);
        let mut attachments = Vec::new();

        for part in message.parts.iter() {
            if !is_attachment(part) {
                continue;
            }

            let filename = match attachment_filename(part) {
                Some(name) => name,
                None => continue,
            };
            if !is_xml_filename(&filename) {
                debug!("Ignoring non-XML attachment '{}'", filename);
                continue;
            }

            let content = match &part.body {
                PartType::Binary(data) | PartType::InlineBinary(data) => data.to_vec(),
                PartType::Text(text) => text.as_bytes().to_vec(),
                PartType::Html(html) => html.as_bytes().to_vec(),
                _ => continue,
            };

            debug!("Found XML attachment: {} ({} bytes)", filename, content.len());
            attachments.push(Attachment { filename, content });
        }

        Ok(ParsedMessage { info, attachments })
    }
}

fn message_info(message: &Message) -> MessageInfo {
    MessageInfo {
        message_id: message.message_id().map(|s| s.to_string()),
        subject: message.subject().map(|s| s.to_string()),
        from: message
            .from()
            .and_then(|addr| addr.first().map(format_address)),
        date: message
            .date()
            .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0)),
    }
}

/// Checks if a message part is an attachment.
fn is_attachment(part: &mail_parser::MessagePart) -> bool {
    if let Some(disposition) = part.content_disposition() {
        if disposition.ctype() == "attachment" {
            return true;
        }
    }

    if part.attachment_name().is_some() {
        return true;
    }

    if let Some(content_type) = part.content_type() {
        let ctype = content_type.ctype();
        if ctype != "text" && ctype != "multipart" && ctype != "message" {
            return content_type.subtype().is_some();
        }
    }

    false
}

/// Sanitized filename from Content-Disposition or Content-Type `name`.
fn attachment_filename(part: &mail_parser::MessagePart) -> Option<String> {
    part.attachment_name()
        .or_else(|| part.content_type().and_then(|ct| ct.attribute("name")))
        .filter(|name| !name.trim().is_empty())
        .map(sanitize_filename)
}

/// Case-insensitive `.xml` suffix check.
pub fn is_xml_filename(filename: &str) -> bool {
    filename.to_ascii_lowercase().ends_with(".xml")
}

fn format_address(addr: &mail_parser::Addr) -> String {
    let address = addr.address().unwrap_or_default();
    match addr.name() {
        Some(name) => format!("{name} <{address}>"),
        None => address.to_string(),
    }
}

const MAX_FILENAME_CHARS: usize = 200;

/// Keeps only characters safe for log lines and error entries.
fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| match c {
            c if c.is_alphanumeric() => c,
            '.' | '-' | '_' | ' ' => c,
            _ => '_',
        })
        .collect();
    let trimmed = cleaned.trim_matches(['.', ' ']);
    if trimmed.is_empty() {
        return "attachment".to_string();
    }

    let total = trimmed.chars().count();
    if total <= MAX_FILENAME_CHARS {
        return trimmed.to_string();
    }
    // Keep the tail so the extension survives truncation.
    trimmed.chars().skip(total - MAX_FILENAME_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with(parts: &[(&str, &str, &str)]) -> Vec<u8> {
        let mut raw = String::from(
            "From: Fornecedor <nfe@fornecedor.com.br>\r\n\
             To: fiscal@example.com\r\n\
             Subject: NF-e 123\r\n\
             Message-ID: <abc@fornecedor.com.br>\r\n\
             Date: Tue, 05 Mar 2024 10:00:00 +0000\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"b1\"\r\n\r\n\
             --b1\r\n\
             Content-Type: text/plain\r\n\r\n\
             Segue a nota.\r\n",
        );
        for (filename, mime, body) in parts {
            raw.push_str(&format!(
                "--b1\r\nContent-Type: {mime}; name=\"{filename}\"\r\n\
                 Content-Disposition: attachment; filename=\"{filename}\"\r\n\r\n{body}\r\n"
            ));
        }
        raw.push_str("--b1--\r\n");
        raw.into_bytes()
    }

    #[test]
    fn test_only_xml_attachments_are_kept() {
        let raw = message_with(&[
            ("invoice.pdf", "application/pdf", "%PDF-1.4"),
            ("NOTA.XML", "application/xml", "<NFe/>"),
            ("danfe.png", "image/png", "png"),
        ]);

        let parsed = AttachmentExtractor::new().extract(&raw).unwrap();
        assert_eq!(parsed.attachments.len(), 1);
        assert_eq!(parsed.attachments[0].filename, "NOTA.XML");
        assert_eq!(parsed.attachments[0].content, b"<NFe/>".to_vec());
    }

    #[test]
    fn test_message_info() {
        let raw = message_with(&[]);
        let parsed = AttachmentExtractor::new().extract(&raw).unwrap();

        assert!(parsed.attachments.is_empty());
        assert_eq!(parsed.info.message_id.as_deref(), Some("abc@fornecedor.com.br"));
        assert_eq!(parsed.info.subject.as_deref(), Some("NF-e 123"));
        assert_eq!(
            parsed.info.from.as_deref(),
            Some("Fornecedor <nfe@fornecedor.com.br>")
        );
        assert_eq!(
            parsed.info.date.map(|d| d.to_rfc3339()),
            Some("2024-03-05T10:00:00+00:00".to_string())
        );
    }

    #[test]
    fn test_xml_filename_check() {
        assert!(is_xml_filename("nota.xml"));
        assert!(is_xml_filename("NOTA.Xml"));
        assert!(!is_xml_filename("nota.xml.pdf"));
        assert!(!is_xml_filename("xml"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("nota.xml"), "nota.xml");
        assert_eq!(sanitize_filename("../../etc/nota.xml"), "_.._etc_nota.xml");
        assert_eq!(sanitize_filename("..."), "attachment");
        assert_eq!(sanitize_filename("nota fiscal.xml"), "nota fiscal.xml");

        let long = format!("{}.xml", "a".repeat(300));
        let cut = sanitize_filename(&long);
        assert_eq!(cut.chars().count(), MAX_FILENAME_CHARS);
        assert!(cut.ends_with(".xml"));
    }
}
