//! Error taxonomy for the orchestration core.
//!
//! Structural errors (`Conflict`, `InvalidState`, `AlreadyResumed`) are
//! surfaced verbatim. Transient errors (`Capability`, `Persistence`) are
//! retried by the orchestrator before they reach the caller.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::models::StageId;

/// A delta that would violate the blackboard or history invariants.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConflictError {
    #[error("note '{0}' already exists on the blackboard")]
    DuplicateNote(String),

    #[error("note '{0}' does not exist on the blackboard")]
    UnknownNote(String),

    #[error("{author} may not resolve note '{note_id}' (designated resolver: {resolver})")]
    UnauthorizedResolution {
        note_id: String,
        author: StageId,
        resolver: StageId,
    },

    #[error("{author} drafted against version {base} but the session is at version {current}")]
    StaleDraft {
        author: StageId,
        base: u32,
        current: u32,
    },

    #[error("delta for stage {expected} was authored by {found}")]
    ForeignAuthor { expected: StageId, found: StageId },
}

/// An agent adapter call that failed or did not answer in time.
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("{stage} adapter timed out after {after:?}")]
    Timeout { stage: StageId, after: Duration },

    #[error("{stage} adapter failed: {message}")]
    Failed { stage: StageId, message: String },
}

impl CapabilityError {
    pub fn failed(stage: StageId, message: impl Into<String>) -> Self {
        CapabilityError::Failed {
            stage,
            message: message.into(),
        }
    }
}

/// The checkpoint store could not read or durably write.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record at {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("checkpoint {session_id}@{seq} already exists")]
    SequenceTaken { session_id: String, seq: u64 },

    #[error("session {session_id} expects checkpoint {expected}, refused {found}")]
    SequenceGap {
        session_id: String,
        expected: u64,
        found: u64,
    },

    #[error("session {0} is already registered")]
    SessionExists(String),

    #[error("session {0} is not registered in the store")]
    UnknownSession(String),

    #[error("'{0}' is not a valid session id")]
    InvalidSessionId(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl PersistenceError {
    /// Whether retrying the same operation could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PersistenceError::Io { .. } | PersistenceError::Unavailable(_)
        )
    }
}

/// Top-level error returned by the orchestrator, gateway and service.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("merge conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("session {session_id} is in an invalid state: {reason}")]
    InvalidState { session_id: String, reason: String },

    #[error("session {session_id} was already resumed at checkpoint {seq}")]
    AlreadyResumed { session_id: String, seq: u64 },

    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("checkpoint {0} not found")]
    CheckpointNotFound(String),

    #[error("invalid checkpoint id '{0}': expected <session-id>@<seq>")]
    InvalidCheckpointId(String),

    #[error("session {0} was cancelled while a step was in flight")]
    Cancelled(String),
}

impl BoardError {
    pub fn invalid_state(session_id: &str, reason: impl Into<String>) -> Self {
        BoardError::InvalidState {
            session_id: session_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            BoardError::Capability(_) => true,
            BoardError::Persistence(e) => e.is_transient(),
            _ => false,
        }
    }
}

pub type BoardResult<T> = std::result::Result<T, BoardError>;
