//! Core data models for artifacts and pipeline runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// SHA-256 of an artifact's raw bytes, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Fingerprint(format!("{:x}", hasher.finalize()))
    }

    pub fn from_hex(hex: impl Into<String>) -> Self {
        Fingerprint(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for file names and log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable compressed blob retrieved from the mailbox.
#[derive(Debug, Clone)]
pub struct SnapshotArtifact {
    /// Attachment file name; determines the declared compression format.
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub fingerprint: Fingerprint,
    pub retrieved_at: DateTime<Utc>,
    /// Identity of the message the artifact came from (`"<uidvalidity>:<uid>"`).
    pub message_key: Option<String>,
}

impl SnapshotArtifact {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>, message_key: Option<String>) -> Self {
        let fingerprint = Fingerprint::of(&bytes);
        Self {
            file_name: file_name.into(),
            bytes,
            fingerprint,
            retrieved_at: Utc::now(),
            message_key,
        }
    }

    pub fn known(&self) -> KnownArtifact {
        KnownArtifact {
            fingerprint: self.fingerprint.clone(),
            message_key: self.message_key.clone(),
        }
    }
}

/// What the pipeline last loaded; used to detect "no new data".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownArtifact {
    pub fingerprint: Fingerprint,
    pub message_key: Option<String>,
}

/// What caused a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Startup,
    Interval,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trigger::Startup => "startup",
            Trigger::Interval => "interval",
            Trigger::Manual => "manual",
        })
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Succeeded,
    FailedNoData,
    FailedError,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// A new store was built and published.
    Succeeded { tables: usize, rows: u64 },
    /// The mailbox still holds the artifact already loaded.
    NoNewData,
    /// Any pipeline error; `kind` is the stable error name.
    Failed { kind: String, message: String },
}

impl RunOutcome {
    pub fn state(&self) -> RunState {
        match self {
            RunOutcome::Succeeded { .. } => RunState::Succeeded,
            RunOutcome::NoNewData => RunState::FailedNoData,
            RunOutcome::Failed { .. } => RunState::FailedError,
        }
    }
}

/// Transient record of one pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub id: String,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Fingerprint of the artifact this run attempted, once known.
    pub fingerprint: Option<Fingerprint>,
    pub outcome: Option<RunOutcome>,
}

impl RunRecord {
    pub fn start(trigger: Trigger) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            trigger,
            started_at: Utc::now(),
            finished_at: None,
            fingerprint: None,
            outcome: None,
        }
    }

    pub fn finish(&mut self, outcome: RunOutcome) {
        self.finished_at = Some(Utc::now());
        self.outcome = Some(outcome);
    }

    /// `None` while the run is still in flight.
    pub fn state(&self) -> Option<RunState> {
        self.outcome.as_ref().map(RunOutcome::state)
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}
