//! Error types for the pipeline and the read-only query path.

use snapshot_relay_core::document::DocumentError;
use snapshot_relay_core::schema::SchemaConflict;
use thiserror::Error;

/// Everything that can end a run as `FAILED_ERROR`.
///
/// These never reach a consumer directly; the run boundary records them in
/// the run history.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Credentials missing or rejected by the mailbox.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network, TLS or protocol failure, including timeouts.
    #[error("connection failed: {0}")]
    Connect(String),

    /// No message matches the subject filter.
    #[error("no message matching subject '{0}'")]
    NotFound(String),

    /// The latest message has zero or several qualifying attachments.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The attachment does not decompress as its declared format.
    #[error("corrupt artifact: {0}")]
    CorruptArtifact(String),

    /// The decompressed payload is not a valid document.
    #[error("invalid document format{}: {message}", .offset.as_ref().map(|o| format!(" at byte {o}")).unwrap_or_default())]
    InvalidFormat {
        offset: Option<usize>,
        message: String,
    },

    #[error(transparent)]
    SchemaConflict(#[from] SchemaConflict),

    /// The store build transaction was rejected; the new store was discarded.
    #[error("store build aborted: {0}")]
    BuildAborted(String),
}

impl PipelineError {
    /// Stable machine-readable name recorded in run records.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Auth(_) => "auth_error",
            PipelineError::Connect(_) => "connect_error",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::MalformedMessage(_) => "malformed_message",
            PipelineError::CorruptArtifact(_) => "corrupt_artifact",
            PipelineError::InvalidFormat { .. } => "invalid_format",
            PipelineError::SchemaConflict(_) => "schema_conflict",
            PipelineError::BuildAborted(_) => "build_aborted",
        }
    }
}

impl From<DocumentError> for PipelineError {
    fn from(err: DocumentError) -> Self {
        PipelineError::InvalidFormat {
            offset: err.offset(),
            message: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::BuildAborted(err.to_string())
    }
}

/// Errors surfaced synchronously to query consumers.
#[derive(Debug, Error)]
pub enum QueryError {
    /// No store has been published yet. Consumers must report this as a
    /// temporarily unavailable service, not as an empty result.
    #[error("service temporarily unavailable: no snapshot loaded yet")]
    NotReady,

    /// The statement is not a pure read, or touches a blocked table.
    #[error("query rejected: {0}")]
    Rejected(String),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("query failed: {0}")]
    Execution(String),
}

impl From<sqlx::Error> for QueryError {
    fn from(err: sqlx::Error) -> Self {
        QueryError::Execution(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_format_message_includes_offset() {
        let err = PipelineError::InvalidFormat {
            offset: Some(42),
            message: "expected value".to_string(),
        };
        assert_eq!(err.to_string(), "invalid document format at byte 42: expected value");
        assert_eq!(err.kind(), "invalid_format");

        let err = PipelineError::InvalidFormat {
            offset: None,
            message: "root must be an object".to_string(),
        };
        assert_eq!(err.to_string(), "invalid document format: root must be an object");
    }

    #[test]
    fn test_document_error_converts() {
        let doc_err = snapshot_relay_core::document::ParsedDocument::from_slice(b"{oops").unwrap_err();
        let err: PipelineError = doc_err.into();
        assert!(matches!(err, PipelineError::InvalidFormat { offset: Some(_), .. }));
    }
}
