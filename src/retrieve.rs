//! Artifact retrieval.
//!
//! Retrieval is split at two seams:
//!
//! - [`Mailbox`] / [`MailSession`]: a blocking message store. The IMAP
//!   implementation lives in [`crate::imap_client`]; tests use in-memory
//!   fakes.
//! - [`ArtifactSource`]: the async interface the pipeline runs against.
//!   [`MailRetriever`] adapts a [`Mailbox`] to it by running the blocking
//!   session on the blocking thread pool under a timeout.
//!
//! Selection rules: the newest message whose subject matches wins, by
//! internal date then by highest UID. When its message key equals the key
//! of the artifact already loaded, retrieval stops at metadata and reports
//! no new data without downloading the body.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use mailparse::{DispositionType, ParsedMail};
use snapshot_relay_core::models::{KnownArtifact, SnapshotArtifact};

use crate::decompress::is_supported_attachment;
use crate::error::PipelineError;

/// Metadata of one message matching the subject filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMeta {
    pub uid: u32,
    pub internal_date: Option<DateTime<FixedOffset>>,
    /// Stable identity across sessions, `"<uidvalidity>:<uid>"`.
    pub key: String,
}

/// An open, authenticated session on one mailbox folder.
pub trait MailSession {
    fn search_subject(&mut self, subject: &str) -> Result<Vec<MessageMeta>, PipelineError>;

    /// Full raw RFC 5322 message.
    fn fetch_message(&mut self, uid: u32) -> Result<Vec<u8>, PipelineError>;

    fn logout(&mut self);
}

/// Something that can open mail sessions.
pub trait Mailbox: Send + Sync {
    fn open(&self) -> Result<Box<dyn MailSession>, PipelineError>;
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    NewArtifact(SnapshotArtifact),
    /// The mailbox still holds what is already loaded. Carries the refreshed
    /// identity, which may name a newer message with identical bytes.
    NoNewData(KnownArtifact),
}

/// Blocking retrieval against one mailbox.
pub fn fetch(
    mailbox: &dyn Mailbox,
    subject: &str,
    known: Option<&KnownArtifact>,
) -> Result<FetchOutcome, PipelineError> {
    let mut session = mailbox.open()?;
    let result = fetch_in_session(session.as_mut(), subject, known);
    session.logout();
    result
}

fn fetch_in_session(
    session: &mut dyn MailSession,
    subject: &str,
    known: Option<&KnownArtifact>,
) -> Result<FetchOutcome, PipelineError> {
    let candidates = session.search_subject(subject)?;
    let latest = select_latest(&candidates)
        .ok_or_else(|| PipelineError::NotFound(subject.to_string()))?;

    tracing::debug!(
        candidates = candidates.len(),
        key = %latest.key,
        "selected latest message"
    );

    if let Some(known) = known {
        if known.message_key.as_deref() == Some(latest.key.as_str()) {
            return Ok(FetchOutcome::NoNewData(known.clone()));
        }
    }

    let raw = session.fetch_message(latest.uid)?;
    let (file_name, bytes) = extract_attachment(&raw)?;
    let artifact = SnapshotArtifact::new(file_name, bytes, Some(latest.key.clone()));

    match known {
        Some(known) if known.fingerprint == artifact.fingerprint => {
            Ok(FetchOutcome::NoNewData(artifact.known()))
        }
        _ => Ok(FetchOutcome::NewArtifact(artifact)),
    }
}

/// Newest by internal date, ties broken by highest UID.
pub fn select_latest(candidates: &[MessageMeta]) -> Option<&MessageMeta> {
    candidates
        .iter()
        .max_by(|a, b| (a.internal_date, a.uid).cmp(&(b.internal_date, b.uid)))
}

/// Pull the single qualifying attachment out of a raw message.
pub fn extract_attachment(raw: &[u8]) -> Result<(String, Vec<u8>), PipelineError> {
    let parsed = mailparse::parse_mail(raw)
        .map_err(|e| PipelineError::MalformedMessage(format!("unparseable message: {}", e)))?;

    let mut found = Vec::new();
    collect_attachments(&parsed, &mut found)?;

    match found.len() {
        0 => Err(PipelineError::MalformedMessage(
            "message has no qualifying attachment".to_string(),
        )),
        1 => Ok(found.remove(0)),
        n => {
            let names: Vec<&str> = found.iter().map(|(name, _)| name.as_str()).collect();
            Err(PipelineError::MalformedMessage(format!(
                "message has {} qualifying attachments: {}",
                n,
                names.join(", ")
            )))
        }
    }
}

fn collect_attachments(
    part: &ParsedMail,
    out: &mut Vec<(String, Vec<u8>)>,
) -> Result<(), PipelineError> {
    if part.subparts.is_empty() {
        if let Some(name) = attachment_name(part) {
            if is_supported_attachment(&name) {
                let body = part.get_body_raw().map_err(|e| {
                    PipelineError::MalformedMessage(format!("attachment {}: {}", name, e))
                })?;
                out.push((name, body));
            }
        }
        return Ok(());
    }
    for sub in &part.subparts {
        collect_attachments(sub, out)?;
    }
    Ok(())
}

fn attachment_name(part: &ParsedMail) -> Option<String> {
    let disposition = part.get_content_disposition();
    let from_disposition = match disposition.disposition {
        DispositionType::Attachment | DispositionType::Inline => {
            disposition.params.get("filename").cloned()
        }
        _ => None,
    };
    from_disposition
        .or_else(|| part.ctype.params.get("name").cloned())
        .filter(|n| !n.trim().is_empty())
}

/// Async source of artifacts, as seen by the pipeline.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    async fn fetch(&self, known: Option<KnownArtifact>) -> Result<FetchOutcome, PipelineError>;
}

/// [`ArtifactSource`] over a blocking [`Mailbox`].
pub struct MailRetriever {
    mailbox: Arc<dyn Mailbox>,
    subject: String,
    timeout: Duration,
}

impl MailRetriever {
    pub fn new(mailbox: Arc<dyn Mailbox>, subject: impl Into<String>, timeout: Duration) -> Self {
        Self {
            mailbox,
            subject: subject.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ArtifactSource for MailRetriever {
    fn name(&self) -> &str {
        "mailbox"
    }

    async fn fetch(&self, known: Option<KnownArtifact>) -> Result<FetchOutcome, PipelineError> {
        let mailbox = self.mailbox.clone();
        let subject = self.subject.clone();
        let task =
            tokio::task::spawn_blocking(move || fetch(mailbox.as_ref(), &subject, known.as_ref()));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(PipelineError::Connect(format!("retrieval task failed: {}", e))),
            Err(_) => Err(PipelineError::Connect(format!(
                "retrieval timed out after {:?}",
                self.timeout
            ))),
        }
    }
}
