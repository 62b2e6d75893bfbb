//! Shared fixtures for integration tests: a scripted mailbox, message and
//! document builders, and a harness wiring the pipeline over in-memory stores.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use fiscalmail::config::SchedulerSettings;
use fiscalmail::db::{source_repo, Database, MailboxSource};
use fiscalmail::document::{DbIdentityResolver, XmlDocumentParser};
use fiscalmail::email::error::Result as EmailResult;
use fiscalmail::email::{EmailError, MailboxConnector, MailboxSession, MessageRef, RawMessage};
use fiscalmail::ingest::{DeduplicationGate, Orchestrator, RunLimits, SourceRunner};
use fiscalmail::MemoryBlobStorage;

pub const ISSUER: &str = "11222333000181";
pub const OWN_COMPANY: &str = "99888777000166";

#[derive(Default)]
struct MailboxState {
    messages: BTreeMap<u32, (NaiveDate, Vec<u8>)>,
    next_uid: u32,
    uid_validity: u32,
    connect_error: Option<String>,
    connect_latency: Duration,
    fetch_latency: Duration,
    failing_fetches: HashSet<u32>,
    connects: u32,
    closes: u32,
    deleted: Vec<u32>,
    searches: Vec<Option<NaiveDate>>,
    fetched: Vec<u32>,
}

/// A scripted mailbox shared by every session opened on it.
#[derive(Clone)]
pub struct FakeMailbox {
    state: Arc<Mutex<MailboxState>>,
}

impl Default for FakeMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MailboxState {
                next_uid: 1,
                uid_validity: 1,
                ..Default::default()
            })),
        }
    }

    /// Appends a message received on `date` and returns its uid.
    pub fn deliver(&self, date: NaiveDate, raw: Vec<u8>) -> u32 {
        let mut state = self.state.lock().unwrap();
        let uid = state.next_uid;
        state.next_uid += 1;
        state.messages.insert(uid, (date, raw));
        uid
    }

    pub fn deliver_today(&self, raw: Vec<u8>) -> u32 {
        self.deliver(chrono::Utc::now().date_naive(), raw)
    }

    pub fn fail_connect(&self, reason: &str) {
        self.state.lock().unwrap().connect_error = Some(reason.to_string());
    }

    pub fn set_connect_latency(&self, latency: Duration) {
        self.state.lock().unwrap().connect_latency = latency;
    }

    pub fn set_fetch_latency(&self, latency: Duration) {
        self.state.lock().unwrap().fetch_latency = latency;
    }

    pub fn fail_fetch(&self, uid: u32) {
        self.state.lock().unwrap().failing_fetches.insert(uid);
    }

    pub fn set_uid_validity(&self, uid_validity: u32) {
        self.state.lock().unwrap().uid_validity = uid_validity;
    }

    pub fn connects(&self) -> u32 {
        self.state.lock().unwrap().connects
    }

    pub fn closes(&self) -> u32 {
        self.state.lock().unwrap().closes
    }

    pub fn deleted(&self) -> Vec<u32> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn searches(&self) -> Vec<Option<NaiveDate>> {
        self.state.lock().unwrap().searches.clone()
    }

    pub fn fetched(&self) -> Vec<u32> {
        self.state.lock().unwrap().fetched.clone()
    }
}

#[async_trait]
impl MailboxConnector for FakeMailbox {
    async fn connect(&self, _source: &MailboxSource) -> EmailResult<Box<dyn MailboxSession>> {
        let (latency, error, uid_validity) = {
            let mut state = self.state.lock().unwrap();
            state.connects += 1;
            (
                state.connect_latency,
                state.connect_error.clone(),
                state.uid_validity,
            )
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(reason) = error {
            return Err(EmailError::ConnectionFailed(reason));
        }
        Ok(Box::new(FakeSession {
            mailbox: self.clone(),
            uid_validity,
            closed: false,
        }))
    }
}

struct FakeSession {
    mailbox: FakeMailbox,
    uid_validity: u32,
    closed: bool,
}

#[async_trait]
impl MailboxSession for FakeSession {
    fn uid_validity(&self) -> u32 {
        self.uid_validity
    }

    async fn search(&mut self, since: Option<NaiveDate>) -> EmailResult<Vec<MessageRef>> {
        let mut state = self.mailbox.state.lock().unwrap();
        state.searches.push(since);
        Ok(state
            .messages
            .iter()
            .filter(|(_, (date, _))| since.is_none_or(|s| *date >= s))
            .map(|(uid, _)| MessageRef::new(*uid))
            .collect())
    }

    async fn fetch(&mut self, message: MessageRef) -> EmailResult<RawMessage> {
        let latency = self.mailbox.state.lock().unwrap().fetch_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.mailbox.state.lock().unwrap();
        if state.failing_fetches.contains(&message.uid) {
            return Err(EmailError::ProtocolError(format!("uid {} unavailable", message.uid)));
        }
        state.fetched.push(message.uid);
        let (_, bytes) = state
            .messages
            .get(&message.uid)
            .cloned()
            .ok_or_else(|| EmailError::ProtocolError(format!("no uid {}", message.uid)))?;
        Ok(RawMessage {
            uid: message.uid,
            bytes,
        })
    }

    async fn delete(&mut self, message: MessageRef) -> EmailResult<()> {
        self.mailbox.state.lock().unwrap().deleted.push(message.uid);
        Ok(())
    }

    async fn close(&mut self) -> EmailResult<()> {
        if !self.closed {
            self.closed = true;
            self.mailbox.state.lock().unwrap().closes += 1;
        }
        Ok(())
    }
}

/// A 44-digit NF-e key, distinct per `n`.
pub fn content_key(n: u32) -> String {
    format!("3524031122233300018155001{:09}1000000004", n)
}

/// An authorized NF-e issued by [`ISSUER`] to `recipient`.
pub fn nfe_xml(key: &str, recipient: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<nfeProc xmlns="http://www.portalfiscal.inf.br/nfe" versao="4.00">
  <NFe>
    <infNFe Id="NFe{key}" versao="4.00">
      <ide><serie>1</serie><nNF>123</nNF><dhEmi>2024-03-05T10:00:00-03:00</dhEmi></ide>
      <emit><CNPJ>{ISSUER}</CNPJ><xNome>Fornecedor LTDA</xNome></emit>
      <dest><CNPJ>{recipient}</CNPJ><xNome>Cliente SA</xNome></dest>
      <total><ICMSTot><vNF>150.00</vNF></ICMSTot></total>
    </infNFe>
  </NFe>
  <protNFe versao="4.00"><infProt><chNFe>{key}</chNFe><cStat>100</cStat></infProt></protNFe>
</nfeProc>"#
    )
}

/// A multipart message carrying `attachments` as `(filename, content)`.
pub fn mime_message(message_id: &str, attachments: &[(&str, &str)]) -> Vec<u8> {
    let mut raw = format!(
        "From: Fornecedor <nfe@fornecedor.com.br>\r\n\
         To: fiscal@example.com\r\n\
         Subject: Documentos fiscais\r\n\
         Message-ID: <{message_id}>\r\n\
         Date: Tue, 05 Mar 2024 10:00:00 +0000\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"part\"\r\n\r\n\
         --part\r\n\
         Content-Type: text/plain\r\n\r\n\
         Segue em anexo.\r\n"
    );
    for (filename, content) in attachments {
        let mime = if filename.to_ascii_lowercase().ends_with(".xml") {
            "application/xml"
        } else {
            "application/pdf"
        };
        raw.push_str(&format!(
            "--part\r\nContent-Type: {mime}; name=\"{filename}\"\r\n\
             Content-Disposition: attachment; filename=\"{filename}\"\r\n\r\n{content}\r\n"
        ));
    }
    raw.push_str("--part--\r\n");
    raw.into_bytes()
}

/// A message with one NF-e attachment for `key`.
pub fn nfe_message(message_id: &str, key: &str) -> Vec<u8> {
    let xml = nfe_xml(key, OWN_COMPANY);
    mime_message(message_id, &[(&format!("{}.xml", key), &xml)])
}

/// The pipeline over an in-memory database, blob store and a [`FakeMailbox`].
pub struct Harness {
    pub db: Database,
    pub blobs: Arc<MemoryBlobStorage>,
    pub mailbox: FakeMailbox,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_limits(RunLimits::default(), SchedulerSettings::default())
    }

    pub fn with_limits(limits: RunLimits, scheduler: SchedulerSettings) -> Self {
        let db = Database::open_in_memory().unwrap();
        fiscalmail::db::entity_repo::seed_owned(&db, &[OWN_COMPANY.to_string()]).unwrap();

        let blobs = Arc::new(MemoryBlobStorage::new());
        let mailbox = FakeMailbox::new();
        let gate = DeduplicationGate::new(Arc::new(db.clone()), blobs.clone());
        let runner = SourceRunner::new(
            db.clone(),
            Arc::new(mailbox.clone()),
            Arc::new(XmlDocumentParser::new()),
            Arc::new(DbIdentityResolver::new(db.clone())),
            gate,
            limits,
        );
        let orchestrator = Arc::new(Orchestrator::new(db.clone(), Arc::new(runner), scheduler));

        Self {
            db,
            blobs,
            mailbox,
            orchestrator,
        }
    }

    /// Stores an active source with default settings and returns it.
    pub fn add_source(&self, id: &str) -> MailboxSource {
        self.add_source_with(id, |_| {})
    }

    pub fn add_source_with(&self, id: &str, configure: impl FnOnce(&mut MailboxSource)) -> MailboxSource {
        let mut source = MailboxSource::new(
            id,
            format!("{}@example.com", id),
            "imap.example.com",
            id,
            "00",
        );
        configure(&mut source);
        source_repo::insert(&self.db, &source).unwrap();
        source
    }

    pub fn source(&self, id: &str) -> MailboxSource {
        source_repo::find_by_id(&self.db, id).unwrap().unwrap()
    }
}
