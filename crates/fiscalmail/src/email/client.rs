//! IMAP implementation of the mailbox contract.

use std::sync::Arc;
use std::time::Duration;

use async_imap::Session;
use async_native_tls::TlsConnector;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::StreamExt;
use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};
use tokio::time::timeout;

use crate::config::ImapSettings;
use crate::db::MailboxSource;
use crate::secrets::CredentialCipher;

use super::connector::{search_query, MailboxConnector, MailboxSession, MessageRef, RawMessage};
use super::error::{EmailError, Result};

/// Type alias for the underlying async stream (async-io reactor over std TcpStream).
type AsyncTcpStream = async_io::Async<std::net::TcpStream>;

/// Type alias for the TLS stream used by the IMAP session.
type TlsStream = async_native_tls::TlsStream<AsyncTcpStream>;

/// Opens IMAP sessions for mailbox sources.
pub struct ImapConnector {
    settings: ImapSettings,
    cipher: Arc<CredentialCipher>,
}

impl ImapConnector {
    pub fn new(settings: ImapSettings, cipher: Arc<CredentialCipher>) -> Self {
        Self { settings, cipher }
    }

    fn folder_for(&self, source: &MailboxSource) -> String {
        source
            .folder
            .clone()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| self.settings.folder.clone())
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn connect(&self, source: &MailboxSource) -> Result<Box<dyn MailboxSession>> {
        if !source.use_tls {
            return Err(EmailError::ConfigError(
                "TLS is required for secure email connections".to_string(),
            ));
        }

        let password = self
            .cipher
            .open(&source.id, &source.password_ciphertext)
            .map_err(|e| EmailError::CredentialsUnavailable(e.to_string()))?;

        let connect_timeout = self.settings.connect_timeout();
        let mut session = timeout(
            connect_timeout,
            open_session(&source.host, source.port, &source.username, &password),
        )
        .await
        .map_err(|_| {
            EmailError::Timeout(format!(
                "connecting to {}:{} took longer than {:?}",
                source.host, source.port, connect_timeout
            ))
        })??;

        let folder = self.folder_for(source);
        let writable = source.delete_after_process;
        let command_timeout = self.settings.command_timeout();

        // EXAMINE keeps the folder read-only; SELECT is needed to flag and expunge.
        let opened = if writable {
            timeout(command_timeout, session.select(&folder)).await
        } else {
            timeout(command_timeout, session.examine(&folder)).await
        };

        let mailbox = match opened {
            Ok(Ok(mailbox)) => mailbox,
            Ok(Err(e)) => {
                let _ = timeout(command_timeout, session.logout()).await;
                let message = e.to_string();
                return Err(if message.contains("doesn't exist") || message.contains("NO") {
                    EmailError::FolderNotFound(folder)
                } else {
                    EmailError::ProtocolError(message)
                });
            }
            Err(_) => {
                let _ = timeout(command_timeout, session.logout()).await;
                return Err(EmailError::Timeout(format!("opening folder '{}'", folder)));
            }
        };

        let uid_validity = match mailbox.uid_validity {
            Some(value) => value,
            None => {
                let _ = timeout(command_timeout, session.logout()).await;
                return Err(EmailError::ProtocolError(
                    "Server did not provide UIDVALIDITY".to_string(),
                ));
            }
        };

        debug!(
            "Folder '{}' opened ({}) with UIDVALIDITY={}",
            folder,
            if writable { "read-write" } else { "read-only" },
            uid_validity
        );

        Ok(Box::new(ImapSession {
            session: Some(session),
            folder,
            uid_validity,
            command_timeout,
            pending_expunge: false,
        }))
    }
}

/// Resolves the host, opens TCP + TLS and logs in with a password.
async fn open_session(
    host: &str,
    port: u16,
    username: &str,
    password: &SecretString,
) -> Result<Session<TlsStream>> {
    info!("Connecting to IMAP server at {}:{}", host, port);

    let addr = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| EmailError::ConnectionFailed(format!("resolving {}: {}", host, e)))?
        .next()
        .ok_or_else(|| EmailError::ConnectionFailed(format!("no address found for {}", host)))?;

    let tcp_stream = AsyncTcpStream::connect(addr)
        .await
        .map_err(|e| EmailError::ConnectionFailed(e.to_string()))?;

    let tls = TlsConnector::new();
    let tls_stream = tls
        .connect(host, tcp_stream)
        .await
        .map_err(|e| EmailError::TlsError(e.to_string()))?;

    let client = async_imap::Client::new(tls_stream);
    let session = client
        .login(username, password.expose_secret())
        .await
        .map_err(|(e, _)| EmailError::AuthenticationFailed(e.to_string()))?;

    info!("Successfully authenticated to IMAP server {}", host);
    Ok(session)
}

/// An open IMAP folder.
struct ImapSession {
    session: Option<Session<TlsStream>>,
    folder: String,
    uid_validity: u32,
    command_timeout: Duration,
    pending_expunge: bool,
}

impl ImapSession {
    fn session(&mut self) -> Result<&mut Session<TlsStream>> {
        self.session
            .as_mut()
            .ok_or_else(|| EmailError::ConnectionFailed("Not connected".to_string()))
    }
}

#[async_trait]
impl MailboxSession for ImapSession {
    fn uid_validity(&self) -> u32 {
        self.uid_validity
    }

    async fn search(&mut self, since: Option<NaiveDate>) -> Result<Vec<MessageRef>> {
        let limit = self.command_timeout;
        let query = search_query(since);
        debug!("Searching '{}' with query: {}", self.folder, query);

        let session = self.session()?;
        let uids = timeout(limit, session.uid_search(&query))
            .await
            .map_err(|_| EmailError::Timeout(format!("search '{}'", query)))?
            .map_err(|e| EmailError::ProtocolError(e.to_string()))?;

        let mut refs: Vec<MessageRef> = uids.into_iter().map(MessageRef::new).collect();
        refs.sort_unstable();
        debug!("Found {} messages matching search", refs.len());
        Ok(refs)
    }

    async fn fetch(&mut self, message: MessageRef) -> Result<RawMessage> {
        let limit = self.command_timeout;
        let session = self.session()?;

        // BODY.PEEK[] leaves the \Seen flag untouched.
        let fetched = timeout(limit, async {
            let stream = session
                .uid_fetch(message.uid.to_string(), "(UID BODY.PEEK[])")
                .await?;
            let items: Vec<_> = stream.collect().await;
            Ok::<_, async_imap::error::Error>(items)
        })
        .await
        .map_err(|_| EmailError::Timeout(format!("fetch uid {}", message.uid)))?
        .map_err(|e| EmailError::ProtocolError(e.to_string()))?;

        for item in fetched {
            match item {
                Ok(fetch) => {
                    if let Some(body) = fetch.body() {
                        return Ok(RawMessage {
                            uid: message.uid,
                            bytes: body.to_vec(),
                        });
                    }
                }
                Err(e) => warn!("Error fetching uid {}: {}", message.uid, e),
            }
        }

        Err(EmailError::ProtocolError(format!(
            "Message with UID {} not found",
            message.uid
        )))
    }

    async fn delete(&mut self, message: MessageRef) -> Result<()> {
        let limit = self.command_timeout;
        let session = self.session()?;

        timeout(limit, async {
            let stream = session
                .uid_store(message.uid.to_string(), "+FLAGS.SILENT (\\Deleted)")
                .await?;
            let _updates: Vec<_> = stream.collect().await;
            Ok::<_, async_imap::error::Error>(())
        })
        .await
        .map_err(|_| EmailError::Timeout(format!("flag uid {}", message.uid)))?
        .map_err(|e| EmailError::ProtocolError(e.to_string()))?;

        self.pending_expunge = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let limit = self.command_timeout;
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };

        if self.pending_expunge {
            let expunged = timeout(limit, async {
                let stream = session.expunge().await?;
                let removed: Vec<_> = stream.collect().await;
                Ok::<_, async_imap::error::Error>(removed.len())
            })
            .await;
            match expunged {
                Ok(Ok(count)) => debug!("Expunged {} messages from '{}'", count, self.folder),
                Ok(Err(e)) => warn!("Expunge failed on '{}': {}", self.folder, e),
                Err(_) => warn!("Expunge timed out on '{}'", self.folder),
            }
            self.pending_expunge = false;
        }

        info!("Disconnecting from IMAP server");
        timeout(limit, session.logout())
            .await
            .map_err(|_| EmailError::Timeout("logout".to_string()))?
            .map_err(|e| EmailError::ProtocolError(e.to_string()))
    }
}

impl Drop for ImapSession {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!("IMAP session dropped without explicit close - connection will be reset");
        }
    }
}
