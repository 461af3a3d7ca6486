//! Resume gateway - the only way a human decision enters a session.
//!
//! A resume is accepted only while the latest checkpoint is `Suspended`.
//! Accepting it appends a `Resumed` checkpoint carrying the decision, then
//! hands the session back to the step loop. Replays are detected from the
//! checkpoint history, so they stay detectable after a restart.

use std::sync::Arc;

use tracing::info;

use crate::error::{BoardError, BoardResult};
use crate::models::{HumanDecision, HumanReview, Verdict};

use super::loop_controller::Orchestrator;
use super::orchestration_state::{CheckpointId, CheckpointRecord, OutcomeMarker};
use super::state::StepOutcome;

pub struct ResumeGateway {
    orchestrator: Arc<Orchestrator>,
}

impl ResumeGateway {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Apply a decision to the session's current suspension.
    pub async fn resume(
        &self,
        session_id: &str,
        verdict: Verdict,
        guidance: Option<String>,
    ) -> BoardResult<StepOutcome> {
        self.apply(session_id, None, verdict, guidance).await
    }

    /// Apply a decision to the specific suspended checkpoint the caller saw.
    pub async fn resume_at(
        &self,
        checkpoint: &CheckpointId,
        verdict: Verdict,
        guidance: Option<String>,
    ) -> BoardResult<StepOutcome> {
        self.apply(&checkpoint.session_id, Some(checkpoint.seq), verdict, guidance)
            .await
    }

    async fn apply(
        &self,
        session_id: &str,
        pinned: Option<u64>,
        verdict: Verdict,
        guidance: Option<String>,
    ) -> BoardResult<StepOutcome> {
        {
            let slot = self.orchestrator.slot(session_id).await?;
            let _guard = slot.lock.lock_owned().await;
            let history = self.orchestrator.history(session_id).await?;

            let Some(latest) = history.last() else {
                return Err(BoardError::invalid_state(session_id, "session has no checkpoints yet"));
            };
            if latest.outcome.is_terminal() {
                self.orchestrator.registry().remove(session_id).await;
            }

            if let Some(seq) = pinned
                && latest.seq != seq
            {
                return Err(classify_pinned(session_id, &history, seq));
            }
            if !latest.outcome.is_suspended() {
                return Err(classify_not_suspended(session_id, &history));
            }

            let decision = HumanDecision::from(verdict);
            let mut state = latest.state.clone();
            state.human_decision = Some(HumanReview {
                decision,
                guidance: guidance.filter(|g| !g.trim().is_empty()),
                draft_version: state.draft_version(),
                cycle_opened: false,
            });

            info!(
                "Session {} draft v{} {} by reviewer",
                session_id,
                state.draft_version(),
                decision
            );
            self.orchestrator
                .commit(CheckpointRecord::new(
                    latest.seq + 1,
                    None,
                    OutcomeMarker::Resumed { decision },
                    state,
                ))
                .await?;
        }

        self.orchestrator.run(session_id).await
    }
}

/// The pinned checkpoint is no longer the latest one.
fn classify_pinned(session_id: &str, history: &[CheckpointRecord], seq: u64) -> BoardError {
    let Some(index) = history.iter().position(|r| r.seq == seq) else {
        return BoardError::CheckpointNotFound(CheckpointId::new(session_id, seq).to_string());
    };

    let pinned = &history[index];
    match history.get(index + 1) {
        Some(next) if pinned.outcome.is_suspended() && matches!(next.outcome, OutcomeMarker::Resumed { .. }) => {
            BoardError::AlreadyResumed {
                session_id: session_id.to_string(),
                seq: next.seq,
            }
        }
        _ => BoardError::invalid_state(
            session_id,
            format!("checkpoint {} is not the pending suspension", seq),
        ),
    }
}

/// The latest checkpoint is not a suspension.
fn classify_not_suspended(session_id: &str, history: &[CheckpointRecord]) -> BoardError {
    let last_suspension = history.iter().rposition(|r| r.outcome.is_suspended());

    let resumed_after = last_suspension.and_then(|index| {
        history[index + 1..]
            .iter()
            .find(|r| matches!(r.outcome, OutcomeMarker::Resumed { .. }))
    });

    match (resumed_after, history.last()) {
        (Some(resumed), _) => BoardError::AlreadyResumed {
            session_id: session_id.to_string(),
            seq: resumed.seq,
        },
        (None, Some(latest)) => BoardError::invalid_state(
            session_id,
            format!("session is not awaiting a decision ({})", latest.outcome),
        ),
        (None, None) => BoardError::invalid_state(session_id, "session has no checkpoints yet"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionState;
    use crate::orchestrator::AbortReason;

    fn record(seq: u64, outcome: OutcomeMarker) -> CheckpointRecord {
        let state = SessionState::new("g".to_string(), "p".to_string(), "openai".to_string());
        CheckpointRecord::new(seq, None, outcome, state)
    }

    fn suspended() -> OutcomeMarker {
        OutcomeMarker::Suspended {
            reason: "awaiting-human".to_string(),
        }
    }

    fn resumed(decision: HumanDecision) -> OutcomeMarker {
        OutcomeMarker::Resumed { decision }
    }

    #[test]
    fn test_resume_after_resume_is_replay() {
        let history = vec![
            record(1, OutcomeMarker::Running),
            record(2, suspended()),
            record(3, resumed(HumanDecision::Approved)),
            record(4, OutcomeMarker::Done),
        ];
        assert!(matches!(
            classify_not_suspended("g", &history),
            BoardError::AlreadyResumed { seq: 3, .. }
        ));
    }

    #[test]
    fn test_never_suspended_is_invalid_state() {
        let history = vec![
            record(1, OutcomeMarker::Running),
            record(
                2,
                OutcomeMarker::Aborted {
                    reason: AbortReason::IterationLimit {
                        iteration: 3,
                        limit: 3,
                    },
                },
            ),
        ];
        assert!(matches!(
            classify_not_suspended("g", &history),
            BoardError::InvalidState { .. }
        ));
    }

    #[test]
    fn test_pinned_replay_after_resuspend() {
        // Rejected at 2, redrafted, suspended again at 6
        let history = vec![
            record(1, OutcomeMarker::Running),
            record(2, suspended()),
            record(3, resumed(HumanDecision::Rejected)),
            record(4, OutcomeMarker::Running),
            record(5, OutcomeMarker::Running),
            record(6, suspended()),
        ];
        assert!(matches!(
            classify_pinned("g", &history, 2),
            BoardError::AlreadyResumed { seq: 3, .. }
        ));
        assert!(matches!(
            classify_pinned("g", &history, 4),
            BoardError::InvalidState { .. }
        ));
        assert!(matches!(
            classify_pinned("g", &history, 40),
            BoardError::CheckpointNotFound(_)
        ));
    }
}
