//! Guardrails - Routing thresholds and hard limits.
//!
//! Hard stops dominate every other routing rule: once the revision cycle cap
//! or the step budget is reached the session is aborted, whatever its scores
//! or pending human decision.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{SessionState, StageId};

// Re-export from config for convenience
pub use crate::config::RoutingConfig;

// ============================================================================
// Abort reasons
// ============================================================================

/// Why a session was terminated without approval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    /// Revision cycle cap reached
    IterationLimit { iteration: u32, limit: u32 },
    /// Adapter step budget exhausted
    StepLimit { steps: u32, limit: u32 },
    /// An adapter kept failing after all retries
    CapabilityFailure { stage: StageId, message: String },
    /// Cancelled by an external caller
    Cancelled { reason: String },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::IterationLimit { .. } => write!(f, "iteration-limit"),
            AbortReason::StepLimit { .. } => write!(f, "step-limit"),
            AbortReason::CapabilityFailure { stage, message } => {
                write!(f, "capability-failure: {} ({})", stage, message)
            }
            AbortReason::Cancelled { reason } => write!(f, "cancelled: {}", reason),
        }
    }
}

// ============================================================================
// Guardrails
// ============================================================================

/// Routing policy: score thresholds plus non-bypassable limits.
#[derive(Debug, Clone)]
pub struct Guardrails {
    pub safety_threshold: f64,
    pub empathy_threshold: f64,
    pub max_iterations: u32,
    pub max_steps: u32,
}

impl Default for Guardrails {
    fn default() -> Self {
        Self::from_config(&RoutingConfig::default())
    }
}

impl Guardrails {
    /// Create guardrails from configuration.
    pub fn from_config(config: &RoutingConfig) -> Self {
        Self {
            safety_threshold: config.safety_threshold,
            empathy_threshold: config.empathy_threshold,
            max_iterations: config.max_iterations,
            max_steps: config.max_steps,
        }
    }

    /// Check the hard limits - returns the abort reason if one is reached.
    pub fn check_hard_stops(&self, state: &SessionState) -> Result<(), AbortReason> {
        if state.iteration_count >= self.max_iterations {
            return Err(AbortReason::IterationLimit {
                iteration: state.iteration_count,
                limit: self.max_iterations,
            });
        }

        if state.steps_taken >= self.max_steps {
            return Err(AbortReason::StepLimit {
                steps: state.steps_taken,
                limit: self.max_steps,
            });
        }

        Ok(())
    }

    /// A missing score counts as failing.
    pub fn safety_passes(&self, score: Option<f64>) -> bool {
        score.unwrap_or(0.0) >= self.safety_threshold
    }

    pub fn empathy_passes(&self, score: Option<f64>) -> bool {
        score.unwrap_or(0.0) >= self.empathy_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SessionState {
        SessionState::new("s".to_string(), "task".to_string(), "openai".to_string())
    }

    #[test]
    fn test_score_passes() {
        let guardrails = Guardrails::default(); // safety 0.85, empathy 0.70

        assert!(!guardrails.safety_passes(Some(0.3)));
        assert!(!guardrails.safety_passes(None));
        assert!(guardrails.safety_passes(Some(0.85)));
        assert!(!guardrails.empathy_passes(Some(0.69)));
        assert!(guardrails.empathy_passes(Some(0.7)));
    }

    #[test]
    fn test_hard_stop_max_iterations() {
        let guardrails = Guardrails {
            max_iterations: 3,
            ..Default::default()
        };
        let mut state = state();
        state.iteration_count = 3;

        assert_eq!(
            guardrails.check_hard_stops(&state),
            Err(AbortReason::IterationLimit {
                iteration: 3,
                limit: 3
            })
        );
    }

    #[test]
    fn test_hard_stop_step_budget() {
        let guardrails = Guardrails {
            max_steps: 10,
            ..Default::default()
        };
        let mut state = state();
        state.steps_taken = 10;

        assert!(matches!(
            guardrails.check_hard_stops(&state),
            Err(AbortReason::StepLimit { steps: 10, limit: 10 })
        ));
    }

    #[test]
    fn test_within_limits_just_below_boundary() {
        let guardrails = Guardrails {
            max_iterations: 3,
            max_steps: 10,
            ..Default::default()
        };
        let mut state = state();
        state.iteration_count = 2;
        state.steps_taken = 9;

        assert!(guardrails.check_hard_stops(&state).is_ok());
    }

    #[test]
    fn test_abort_reason_labels() {
        let reason = AbortReason::IterationLimit {
            iteration: 3,
            limit: 3,
        };
        assert_eq!(reason.to_string(), "iteration-limit");

        let reason = AbortReason::Cancelled {
            reason: "operator".to_string(),
        };
        assert_eq!(reason.to_string(), "cancelled: operator");
    }
}
