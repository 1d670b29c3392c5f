//! IMAP-over-TLS implementation of [`Mailbox`].
//!
//! Opens a TCP connection with a connect timeout, applies read/write
//! timeouts to the socket, negotiates TLS with `native-tls`, logs in and
//! selects the configured folder. Messages are read with `BODY.PEEK[]` so
//! retrieval never changes flags on the server.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use native_tls::{TlsConnector, TlsStream};

use crate::config::{Credentials, MailboxConfig, ACCOUNT_ENV, SECRET_ENV};
use crate::error::PipelineError;
use crate::retrieve::{MailSession, Mailbox, MessageMeta};

pub struct ImapMailbox {
    host: String,
    port: u16,
    folder: String,
    credentials: Option<Credentials>,
    timeout: Duration,
}

impl ImapMailbox {
    pub fn from_config(config: &MailboxConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            folder: config.folder.clone(),
            credentials: config.credentials(),
            timeout: config.timeout(),
        }
    }

    fn connect(&self) -> Result<TlsStream<TcpStream>, PipelineError> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| PipelineError::Connect(format!("resolve {}: {}", self.host, e)))?
            .next()
            .ok_or_else(|| PipelineError::Connect(format!("no address for {}", self.host)))?;

        let tcp = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| PipelineError::Connect(format!("{}:{}: {}", self.host, self.port, e)))?;
        tcp.set_read_timeout(Some(self.timeout))
            .and_then(|_| tcp.set_write_timeout(Some(self.timeout)))
            .map_err(|e| PipelineError::Connect(e.to_string()))?;

        let tls = TlsConnector::builder()
            .build()
            .map_err(|e| PipelineError::Connect(format!("tls setup: {}", e)))?;
        tls.connect(&self.host, tcp)
            .map_err(|e| PipelineError::Connect(format!("tls handshake: {}", e)))
    }
}

impl Mailbox for ImapMailbox {
    fn open(&self) -> Result<Box<dyn MailSession>, PipelineError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            PipelineError::Auth(format!(
                "no mailbox credentials (set {} and {})",
                ACCOUNT_ENV, SECRET_ENV
            ))
        })?;

        let stream = self.connect()?;
        let mut client = imap::Client::new(stream);
        client
            .read_greeting()
            .map_err(|e| PipelineError::Connect(format!("greeting: {}", e)))?;

        let mut session = client
            .login(&credentials.account, &credentials.secret)
            .map_err(|(e, _)| PipelineError::Auth(e.to_string()))?;

        let selected = session
            .select(&self.folder)
            .map_err(|e| PipelineError::Connect(format!("select {}: {}", self.folder, e)))?;

        tracing::debug!(host = %self.host, folder = %self.folder, "mailbox session open");

        Ok(Box::new(ImapSession {
            session,
            uid_validity: selected.uid_validity.unwrap_or(0),
        }))
    }
}

struct ImapSession {
    session: imap::Session<TlsStream<TcpStream>>,
    uid_validity: u32,
}

/// Quote a string for an IMAP SEARCH argument.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

impl MailSession for ImapSession {
    fn search_subject(&mut self, subject: &str) -> Result<Vec<MessageMeta>, PipelineError> {
        let mut uids: Vec<u32> = self
            .session
            .uid_search(format!("SUBJECT {}", quote(subject)))
            .map_err(|e| PipelineError::Connect(format!("search: {}", e)))?
            .into_iter()
            .collect();
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        uids.sort_unstable();

        let set: Vec<String> = uids.iter().map(u32::to_string).collect();
        let fetches = self
            .session
            .uid_fetch(set.join(","), "(UID INTERNALDATE)")
            .map_err(|e| PipelineError::Connect(format!("fetch metadata: {}", e)))?;

        Ok(fetches
            .iter()
            .filter_map(|f| {
                let uid = f.uid?;
                Some(MessageMeta {
                    uid,
                    internal_date: f.internal_date(),
                    key: format!("{}:{}", self.uid_validity, uid),
                })
            })
            .collect())
    }

    fn fetch_message(&mut self, uid: u32) -> Result<Vec<u8>, PipelineError> {
        let fetches = self
            .session
            .uid_fetch(uid.to_string(), "BODY.PEEK[]")
            .map_err(|e| PipelineError::Connect(format!("fetch body: {}", e)))?;

        fetches
            .iter()
            .find(|f| f.uid == Some(uid) || f.uid.is_none())
            .and_then(|f| f.body())
            .map(<[u8]>::to_vec)
            .ok_or_else(|| PipelineError::MalformedMessage(format!("message {} has no body", uid)))
    }

    fn logout(&mut self) {
        if let Err(e) = self.session.logout() {
            tracing::debug!(error = %e, "imap logout failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("manoli_backup"), "\"manoli_backup\"");
        assert_eq!(quote("a \"b\" \\c"), "\"a \\\"b\\\" \\\\c\"");
    }

    #[test]
    fn test_missing_credentials_is_auth_error() {
        let mailbox = ImapMailbox {
            host: "127.0.0.1".to_string(),
            port: 1,
            folder: "INBOX".to_string(),
            credentials: None,
            timeout: Duration::from_secs(1),
        };
        let err = mailbox.open().err().unwrap();
        assert_eq!(err.kind(), "auth_error");
    }

    #[test]
    fn test_refused_connection_is_connect_error() {
        let mailbox = ImapMailbox {
            host: "127.0.0.1".to_string(),
            port: 1,
            folder: "INBOX".to_string(),
            credentials: Some(Credentials {
                account: "a".to_string(),
                secret: "b".to_string(),
            }),
            timeout: Duration::from_secs(1),
        };
        let err = mailbox.open().err().unwrap();
        assert_eq!(err.kind(), "connect_error");
    }
}
