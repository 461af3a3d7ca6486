//! Session status derivation from the checkpoint history.
//!
//! Status is never stored separately: it is derived from the session
//! registration record and the latest checkpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::StageId;
use crate::orchestrator::{AbortReason, CheckpointRecord, OutcomeMarker, SessionMeta};

/// Session status derived from the latest checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SessionStatus {
    /// Registered, no checkpoint yet
    Ready,
    /// Stages are running (or a crash left the loop mid-way)
    InProgress,
    /// Waiting for a human decision
    AwaitingHuman { reason: String },
    /// Draft approved
    Approved,
    /// Terminated without approval
    Aborted { reason: AbortReason },
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Ready => write!(f, "ready"),
            SessionStatus::InProgress => write!(f, "in_progress"),
            SessionStatus::AwaitingHuman { .. } => write!(f, "awaiting_human"),
            SessionStatus::Approved => write!(f, "approved"),
            SessionStatus::Aborted { .. } => write!(f, "aborted"),
        }
    }
}

/// Information about a session derived from its checkpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub generation_profile: String,
    pub status: SessionStatus,
    /// Stage being run when the latest checkpoint was written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<StageId>,
    pub terminal: bool,
    pub iteration_count: u32,
    pub draft_version: u32,
    /// Sequence number of the latest checkpoint (0 when none)
    pub latest_seq: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub empathy_score: Option<f64>,
}

/// Derive session status from its registration and latest checkpoint.
pub fn derive_status(meta: &SessionMeta, latest: Option<&CheckpointRecord>) -> SessionInfo {
    let Some(record) = latest else {
        return SessionInfo {
            session_id: meta.session_id.clone(),
            created_at: meta.created_at,
            generation_profile: meta.generation_profile.clone(),
            status: SessionStatus::Ready,
            current_stage: None,
            terminal: false,
            iteration_count: 0,
            draft_version: 0,
            latest_seq: 0,
            safety_score: None,
            empathy_score: None,
        };
    };

    let status = match &record.outcome {
        OutcomeMarker::Running | OutcomeMarker::Resumed { .. } => SessionStatus::InProgress,
        OutcomeMarker::Suspended { reason } => SessionStatus::AwaitingHuman {
            reason: reason.clone(),
        },
        OutcomeMarker::Done => SessionStatus::Approved,
        OutcomeMarker::Aborted { reason } => SessionStatus::Aborted {
            reason: reason.clone(),
        },
    };

    SessionInfo {
        session_id: meta.session_id.clone(),
        created_at: meta.created_at,
        generation_profile: meta.generation_profile.clone(),
        status,
        current_stage: record.state.active_stage,
        terminal: record.outcome.is_terminal(),
        iteration_count: record.state.iteration_count,
        draft_version: record.state.draft_version(),
        latest_seq: record.seq,
        safety_score: record.state.safety_score(),
        empathy_score: record.state.empathy_score(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> SessionMeta {
        SessionMeta::new("st-1".to_string(), "p".to_string(), "groq".to_string())
    }

    #[test]
    fn test_derive_status_ready() {
        let info = derive_status(&meta(), None);
        assert_eq!(info.status, SessionStatus::Ready);
        assert_eq!(info.latest_seq, 0);
        assert!(!info.terminal);
    }

    #[test]
    fn test_derive_status_awaiting_and_aborted() {
        let meta = meta();
        let suspended = CheckpointRecord::new(
            4,
            None,
            OutcomeMarker::Suspended {
                reason: "awaiting-human".to_string(),
            },
            meta.initial_state(),
        );
        let info = derive_status(&meta, Some(&suspended));
        assert_eq!(info.status.to_string(), "awaiting_human");
        assert_eq!(info.latest_seq, 4);

        let aborted = CheckpointRecord::new(
            5,
            None,
            OutcomeMarker::Aborted {
                reason: AbortReason::StepLimit { steps: 40, limit: 40 },
            },
            meta.initial_state(),
        );
        let info = derive_status(&meta, Some(&aborted));
        assert!(info.terminal);
        assert!(matches!(info.status, SessionStatus::Aborted { .. }));
    }
}
