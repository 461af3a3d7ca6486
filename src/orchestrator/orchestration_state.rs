//! Checkpoint records - the durable history of a review session.
//!
//! Every orchestrator step appends one immutable [`CheckpointRecord`]. The
//! latest record of a session is the authoritative state; earlier records
//! are kept for replay and inspection.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BoardError;
use crate::models::{HumanDecision, SessionState, StageId};
use crate::slug::is_valid_session_id;

use super::guardrails::AbortReason;

/// Current schema version for checkpoint files.
/// Bump when adding/removing/modifying fields.
pub const SCHEMA_VERSION: u32 = 1;

// ============================================================================
// Outcome marker
// ============================================================================

/// What happened at the step that produced a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeMarker {
    /// A stage ran and the session continues
    Running,
    /// Waiting for an external decision
    Suspended { reason: String },
    /// A human decision was recorded by the resume gateway
    Resumed { decision: HumanDecision },
    /// The draft was approved
    Done,
    /// The session was terminated without approval
    Aborted { reason: AbortReason },
}

impl OutcomeMarker {
    /// Done and Aborted sessions never run again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutcomeMarker::Done | OutcomeMarker::Aborted { .. })
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, OutcomeMarker::Suspended { .. })
    }
}

impl fmt::Display for OutcomeMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeMarker::Running => write!(f, "running"),
            OutcomeMarker::Suspended { reason } => write!(f, "suspended ({})", reason),
            OutcomeMarker::Resumed { decision } => write!(f, "resumed ({})", decision),
            OutcomeMarker::Done => write!(f, "done"),
            OutcomeMarker::Aborted { reason } => write!(f, "aborted ({})", reason),
        }
    }
}

// ============================================================================
// Checkpoint identifiers
// ============================================================================

/// Addresses one checkpoint: `<session-id>@<seq>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointId {
    pub session_id: String,
    pub seq: u64,
}

impl CheckpointId {
    pub fn new(session_id: impl Into<String>, seq: u64) -> Self {
        Self {
            session_id: session_id.into(),
            seq,
        }
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.session_id, self.seq)
    }
}

impl FromStr for CheckpointId {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BoardError::InvalidCheckpointId(s.to_string());
        let (session_id, seq) = s.rsplit_once('@').ok_or_else(invalid)?;
        if !is_valid_session_id(session_id) {
            return Err(invalid());
        }
        let seq = seq.parse::<u64>().map_err(|_| invalid())?;
        Ok(Self::new(session_id, seq))
    }
}

// ============================================================================
// Checkpoint record
// ============================================================================

/// One immutable entry of a session's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointRecord {
    /// Schema version for migration support
    pub schema_version: u32,
    pub session_id: String,
    /// 1-based, gapless, strictly increasing within a session
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    /// Stage whose delta produced this state (None for gateway/router records)
    pub stage_just_run: Option<StageId>,
    pub outcome: OutcomeMarker,
    pub state: SessionState,
}

impl CheckpointRecord {
    pub fn new(
        seq: u64,
        stage_just_run: Option<StageId>,
        outcome: OutcomeMarker,
        state: SessionState,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            session_id: state.session_id.clone(),
            seq,
            timestamp: Utc::now(),
            stage_just_run,
            outcome,
            state,
        }
    }

    pub fn id(&self) -> CheckpointId {
        CheckpointId::new(self.session_id.clone(), self.seq)
    }

    /// Lightweight view for history listings.
    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            seq: self.seq,
            timestamp: self.timestamp,
            stage_just_run: self.stage_just_run,
            outcome: self.outcome.clone(),
            draft_version: self.state.draft_version(),
            iteration_count: self.state.iteration_count,
            active_stage: self.state.active_stage,
            safety_score: self.state.safety_score(),
            empathy_score: self.state.empathy_score(),
        }
    }
}

/// History listing entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointSummary {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub stage_just_run: Option<StageId>,
    pub outcome: OutcomeMarker,
    pub draft_version: u32,
    pub iteration_count: u32,
    pub active_stage: Option<StageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub empathy_score: Option<f64>,
}

// ============================================================================
// Session metadata
// ============================================================================

/// Registration record written once when a session is started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMeta {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub initial_prompt: String,
    pub generation_profile: String,
}

impl SessionMeta {
    pub fn new(session_id: String, initial_prompt: String, generation_profile: String) -> Self {
        Self {
            session_id,
            created_at: Utc::now(),
            initial_prompt,
            generation_profile,
        }
    }

    /// State the session starts from before its first checkpoint.
    pub fn initial_state(&self) -> SessionState {
        SessionState::new(
            self.session_id.clone(),
            self.initial_prompt.clone(),
            self.generation_profile.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> SessionMeta {
        SessionMeta::new(
            "exam-stress-1a2b3c4d".to_string(),
            "Exam stress".to_string(),
            "ollama".to_string(),
        )
    }

    #[test]
    fn test_checkpoint_id_round_trip() {
        let id: CheckpointId = "exam-stress-1a2b3c4d@12".parse().unwrap();
        assert_eq!(id.session_id, "exam-stress-1a2b3c4d");
        assert_eq!(id.seq, 12);
        assert_eq!(id.to_string(), "exam-stress-1a2b3c4d@12");
    }

    #[test]
    fn test_checkpoint_id_rejects_garbage() {
        assert!("no-separator".parse::<CheckpointId>().is_err());
        assert!("@4".parse::<CheckpointId>().is_err());
        assert!("s@four".parse::<CheckpointId>().is_err());
        assert!(matches!(
            "s@".parse::<CheckpointId>(),
            Err(BoardError::InvalidCheckpointId(_))
        ));
    }

    #[test]
    fn test_checkpoint_id_rejects_paths() {
        for raw in ["../../x@1", "a/b@2", "/etc@3", "Upper@4", "-lead@5"] {
            assert!(
                matches!(
                    raw.parse::<CheckpointId>(),
                    Err(BoardError::InvalidCheckpointId(_))
                ),
                "{} should not parse",
                raw
            );
        }
    }

    #[test]
    fn test_terminal_outcomes() {
        assert!(OutcomeMarker::Done.is_terminal());
        assert!(
            OutcomeMarker::Aborted {
                reason: AbortReason::Cancelled {
                    reason: "x".to_string()
                }
            }
            .is_terminal()
        );
        assert!(!OutcomeMarker::Running.is_terminal());
        assert!(
            !OutcomeMarker::Suspended {
                reason: "awaiting-human".to_string()
            }
            .is_terminal()
        );
    }

    #[test]
    fn test_record_carries_schema_and_session() {
        let record = CheckpointRecord::new(1, None, OutcomeMarker::Running, meta().initial_state());
        assert_eq!(record.schema_version, SCHEMA_VERSION);
        assert_eq!(record.session_id, "exam-stress-1a2b3c4d");
        assert_eq!(record.id().to_string(), "exam-stress-1a2b3c4d@1");

        let summary = record.summary();
        assert_eq!(summary.draft_version, 0);
        assert!(summary.safety_score.is_none());
    }

    #[test]
    fn test_outcome_serialization_is_tagged() {
        let outcome = OutcomeMarker::Resumed {
            decision: HumanDecision::Rejected,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["kind"], "resumed");
        assert_eq!(json["decision"], "rejected");
    }
}
