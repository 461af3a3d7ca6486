//! Conditional routing: which stage runs next, or whether the session stops.
//!
//! `route` is a pure function of the session state and the guardrails. The
//! same state always yields the same decision.

use serde::{Deserialize, Serialize};

use crate::models::{HumanDecision, SessionState, Severity, StageId};

use super::guardrails::{AbortReason, Guardrails};

/// Suspension reason used while a draft waits for a human decision.
pub const AWAITING_HUMAN: &str = "awaiting-human";

/// Next action for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    RunStage { stage: StageId },
    Suspend { reason: String },
    Finalize,
    Abort { reason: AbortReason },
}

impl Decision {
    pub fn run(stage: StageId) -> Self {
        Decision::RunStage { stage }
    }
}

/// Decide the next action. Rules are evaluated in order, first match wins.
pub fn route(state: &SessionState, guardrails: &Guardrails) -> Decision {
    // 1. Hard limits
    if let Err(reason) = guardrails.check_hard_stops(state) {
        return Decision::Abort { reason };
    }

    // 2. Redraft: nothing to review yet, unsafe draft, or a blocking note open
    if !state.has_draft() {
        return Decision::run(StageId::Drafting);
    }
    if state.has_evaluated(StageId::Safety) && !guardrails.safety_passes(state.safety_score()) {
        return Decision::run(StageId::Drafting);
    }
    if state.open_notes(Severity::Blocking).next().is_some() {
        return Decision::run(StageId::Drafting);
    }

    // 3. Safety review of the current draft
    if !state.has_evaluated(StageId::Safety) {
        return Decision::run(StageId::Safety);
    }

    // 4. Critic: first look, or low empathy with warnings still open
    if !state.has_evaluated(StageId::Critic) {
        return Decision::run(StageId::Critic);
    }
    if !guardrails.empathy_passes(state.empathy_score())
        && state.open_notes(Severity::Warning).next().is_some()
    {
        return Decision::run(StageId::Critic);
    }

    // 5-7. Human in the loop
    match state.effective_decision() {
        HumanDecision::Pending => Decision::Suspend {
            reason: AWAITING_HUMAN.to_string(),
        },
        HumanDecision::Rejected => Decision::run(StageId::Drafting),
        HumanDecision::Approved => Decision::Finalize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EMPATHY_SCORE, HumanReview, SAFETY_SCORE, SessionStateDelta};
    use crate::orchestrator::merge::merge;

    fn guardrails() -> Guardrails {
        Guardrails::default()
    }

    fn fresh() -> SessionState {
        SessionState::new(
            "s-1".to_string(),
            "Help with panic attacks".to_string(),
            "openai".to_string(),
        )
    }

    fn apply(state: &SessionState, delta: SessionStateDelta) -> SessionState {
        merge(state, delta).unwrap()
    }

    fn drafted() -> SessionState {
        let state = fresh();
        apply(
            &state,
            SessionStateDelta::for_state(StageId::Drafting, &state).with_draft("v1"),
        )
    }

    fn reviewed(safety: f64, empathy: f64) -> SessionState {
        let state = drafted();
        let state = apply(
            &state,
            SessionStateDelta::for_state(StageId::Safety, &state).with_metric(SAFETY_SCORE, safety),
        );
        apply(
            &state,
            SessionStateDelta::for_state(StageId::Critic, &state).with_metric(EMPATHY_SCORE, empathy),
        )
    }

    #[test]
    fn test_fresh_session_routes_to_drafting() {
        assert_eq!(route(&fresh(), &guardrails()), Decision::run(StageId::Drafting));
    }

    #[test]
    fn test_new_draft_routes_to_safety() {
        assert_eq!(route(&drafted(), &guardrails()), Decision::run(StageId::Safety));
    }

    #[test]
    fn test_low_safety_routes_back_to_drafting() {
        let state = drafted();
        let state = apply(
            &state,
            SessionStateDelta::for_state(StageId::Safety, &state).with_metric(SAFETY_SCORE, 0.3),
        );
        assert_eq!(route(&state, &guardrails()), Decision::run(StageId::Drafting));
    }

    #[test]
    fn test_missing_safety_score_counts_as_failing() {
        let state = drafted();
        let state = apply(&state, SessionStateDelta::for_state(StageId::Safety, &state));
        assert_eq!(route(&state, &guardrails()), Decision::run(StageId::Drafting));
    }

    #[test]
    fn test_blocking_note_routes_to_drafting() {
        let state = drafted();
        let state = apply(
            &state,
            SessionStateDelta::for_state(StageId::Safety, &state)
                .with_metric(SAFETY_SCORE, 0.95)
                .with_note("unsafe", Severity::Blocking, "prescribes medication"),
        );
        assert_eq!(route(&state, &guardrails()), Decision::run(StageId::Drafting));
    }

    #[test]
    fn test_safe_draft_routes_to_critic() {
        let state = drafted();
        let state = apply(
            &state,
            SessionStateDelta::for_state(StageId::Safety, &state).with_metric(SAFETY_SCORE, 0.9),
        );
        assert_eq!(route(&state, &guardrails()), Decision::run(StageId::Critic));
    }

    #[test]
    fn test_low_empathy_with_warning_routes_to_critic() {
        let state = reviewed(0.9, 0.4);
        let state = apply(
            &state,
            SessionStateDelta::for_state(StageId::Critic, &state)
                .with_metric(EMPATHY_SCORE, 0.4)
                .with_note("tone", Severity::Warning, "cold"),
        );
        assert_eq!(route(&state, &guardrails()), Decision::run(StageId::Critic));
    }

    #[test]
    fn test_low_empathy_without_warnings_suspends() {
        let state = reviewed(0.9, 0.4);
        assert_eq!(
            route(&state, &guardrails()),
            Decision::Suspend {
                reason: AWAITING_HUMAN.to_string()
            }
        );
    }

    #[test]
    fn test_human_decisions() {
        let mut state = reviewed(0.9, 0.8);

        state.human_decision = Some(HumanReview {
            decision: HumanDecision::Approved,
            guidance: None,
            draft_version: 1,
            cycle_opened: false,
        });
        assert_eq!(route(&state, &guardrails()), Decision::Finalize);

        state.human_decision = Some(HumanReview {
            decision: HumanDecision::Rejected,
            guidance: Some("warmer".to_string()),
            draft_version: 1,
            cycle_opened: false,
        });
        assert_eq!(route(&state, &guardrails()), Decision::run(StageId::Drafting));
    }

    #[test]
    fn test_decision_on_older_draft_does_not_apply() {
        let mut state = reviewed(0.9, 0.8);
        state.human_decision = Some(HumanReview {
            decision: HumanDecision::Approved,
            guidance: None,
            draft_version: 0,
            cycle_opened: false,
        });
        assert!(matches!(route(&state, &guardrails()), Decision::Suspend { .. }));
    }

    #[test]
    fn test_iteration_cap_dominates_approval() {
        let mut state = reviewed(0.9, 0.8);
        state.iteration_count = 3;
        state.human_decision = Some(HumanReview {
            decision: HumanDecision::Approved,
            guidance: None,
            draft_version: 1,
            cycle_opened: false,
        });
        assert!(matches!(
            route(&state, &guardrails()),
            Decision::Abort {
                reason: AbortReason::IterationLimit { .. }
            }
        ));
    }

    #[test]
    fn test_route_is_deterministic() {
        let state = reviewed(0.5, 0.9);
        let first = route(&state, &guardrails());
        for _ in 0..5 {
            assert_eq!(route(&state, &guardrails()), first);
        }
    }
}
