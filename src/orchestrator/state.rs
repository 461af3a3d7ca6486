use serde::{Deserialize, Serialize};

use super::guardrails::AbortReason;
use super::orchestration_state::{CheckpointSummary, OutcomeMarker};

/// Result of a single orchestrator step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutcome {
    /// A stage ran; call `step` again
    Continue,
    /// Waiting for a human decision
    Suspended { reason: String },
    /// Draft approved
    Done,
    Aborted { reason: AbortReason },
}

impl StepOutcome {
    pub fn is_continue(&self) -> bool {
        matches!(self, StepOutcome::Continue)
    }

    /// Map a persisted outcome marker onto the step result it represents.
    pub fn from_marker(marker: &OutcomeMarker) -> Self {
        match marker {
            OutcomeMarker::Running | OutcomeMarker::Resumed { .. } => StepOutcome::Continue,
            OutcomeMarker::Suspended { reason } => StepOutcome::Suspended {
                reason: reason.clone(),
            },
            OutcomeMarker::Done => StepOutcome::Done,
            OutcomeMarker::Aborted { reason } => StepOutcome::Aborted {
                reason: reason.clone(),
            },
        }
    }
}

/// Where a run stopped, returned by start/resume/continue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub session_id: String,
    pub outcome: StepOutcome,
    /// Latest checkpoint once the run settled
    pub latest: CheckpointSummary,
    pub current_draft: String,
}
