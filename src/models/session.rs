//! Session state threaded through every pipeline step.
//!
//! `SessionState` is the full snapshot persisted in each checkpoint. It is
//! only ever replaced wholesale: the orchestrator builds the next state via
//! [`crate::orchestrator::merge`] and the resume gateway builds a copy with
//! the human decision filled in.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metric name owned by the safety stage.
pub const SAFETY_SCORE: &str = "safety_score";
/// Metric name owned by the critic stage.
pub const EMPATHY_SCORE: &str = "empathy_score";

// ============================================================================
// Stages
// ============================================================================

/// A pipeline stage that can be scheduled by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Drafting,
    Safety,
    Critic,
}

impl StageId {
    pub const ALL: [StageId; 3] = [StageId::Drafting, StageId::Safety, StageId::Critic];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Drafting => "drafting",
            StageId::Safety => "safety",
            StageId::Critic => "critic",
        }
    }

    /// Human-friendly label for status output.
    pub fn label(&self) -> &'static str {
        match self {
            StageId::Drafting => "Drafting Team",
            StageId::Safety => "Safety Team",
            StageId::Critic => "Clinical Critic Team",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drafting" => Ok(StageId::Drafting),
            "safety" => Ok(StageId::Safety),
            "critic" => Ok(StageId::Critic),
            other => Err(format!("unknown stage '{}'", other)),
        }
    }
}

// ============================================================================
// Blackboard
// ============================================================================

/// How strongly a note should influence routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Forces a redraft while unresolved on the current draft version
    Blocking,
    /// Keeps the critic engaged while empathy is below threshold
    Warning,
    Info,
}

/// A note posted on the shared blackboard. Content is immutable; only
/// `resolved` may flip, and only to `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlackboardNote {
    /// Stage that posted the note
    pub author: StageId,
    pub severity: Severity,
    pub content: String,
    pub resolved: bool,
    /// Draft version the note was posted against
    pub draft_version: u32,
    /// Stage designated to act on the note; defaults to the author
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<StageId>,
}

impl BlackboardNote {
    /// The only stage allowed to mark this note resolved.
    pub fn resolver(&self) -> StageId {
        self.assignee.unwrap_or(self.author)
    }
}

/// One immutable entry of the draft history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftVersion {
    /// 1-based version number
    pub version: u32,
    pub author: StageId,
    pub text: String,
}

// ============================================================================
// Human decision
// ============================================================================

/// Human review state for a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanDecision {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for HumanDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HumanDecision::Pending => write!(f, "pending"),
            HumanDecision::Approved => write!(f, "approved"),
            HumanDecision::Rejected => write!(f, "rejected"),
        }
    }
}

/// A decision a human can submit through the resume gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approve,
    Reject,
}

impl From<Verdict> for HumanDecision {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Approve => HumanDecision::Approved,
            Verdict::Reject => HumanDecision::Rejected,
        }
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" => Ok(Verdict::Approve),
            "reject" | "rejected" | "revise" => Ok(Verdict::Reject),
            other => Err(format!(
                "invalid decision '{}': must be 'approve' or 'reject'",
                other
            )),
        }
    }
}

/// Decision recorded by the resume gateway, pinned to the draft it judged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanReview {
    pub decision: HumanDecision,
    /// Free-text guidance for the drafting stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    pub draft_version: u32,
    /// Set once a rejection has been counted as a revision cycle
    #[serde(default)]
    pub cycle_opened: bool,
}

// ============================================================================
// Session State
// ============================================================================

/// Full snapshot passed between steps and persisted in every checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    /// Prompt the session was started with
    pub initial_prompt: String,
    /// Generation backend profile chosen at start (passed through to adapters)
    pub generation_profile: String,
    pub current_draft: String,
    /// Every draft ever produced, oldest first; the last entry is current
    pub draft_history: Vec<DraftVersion>,
    pub blackboard_notes: BTreeMap<String, BlackboardNote>,
    /// Latest signal payload per stage, last write wins
    pub intent_signals: BTreeMap<StageId, Value>,
    /// Scores keyed by owning stage, then metric name
    pub metrics: BTreeMap<StageId, BTreeMap<String, f64>>,
    /// Draft version each stage last ran against
    pub evaluations: BTreeMap<StageId, u32>,
    /// Completed revision cycles (human rejections acted upon)
    pub iteration_count: u32,
    /// Adapter steps merged so far
    pub steps_taken: u32,
    pub human_decision: Option<HumanReview>,
    pub active_stage: Option<StageId>,
}

impl SessionState {
    /// Create an empty state for a new session.
    pub fn new(session_id: String, initial_prompt: String, generation_profile: String) -> Self {
        Self {
            session_id,
            initial_prompt,
            generation_profile,
            current_draft: String::new(),
            draft_history: Vec::new(),
            blackboard_notes: BTreeMap::new(),
            intent_signals: BTreeMap::new(),
            metrics: BTreeMap::new(),
            evaluations: BTreeMap::new(),
            iteration_count: 0,
            steps_taken: 0,
            human_decision: None,
            active_stage: None,
        }
    }

    /// Version number of the current draft (0 before the first draft).
    pub fn draft_version(&self) -> u32 {
        self.draft_history.len() as u32
    }

    pub fn has_draft(&self) -> bool {
        !self.draft_history.is_empty()
    }

    /// Whether `stage` has already run against the current draft version.
    pub fn has_evaluated(&self, stage: StageId) -> bool {
        self.has_draft() && self.evaluations.get(&stage) == Some(&self.draft_version())
    }

    /// Raw metric value, regardless of which draft it was computed for.
    pub fn metric(&self, stage: StageId, name: &str) -> Option<f64> {
        self.metrics.get(&stage).and_then(|m| m.get(name)).copied()
    }

    /// Metric value only if `stage` evaluated the current draft version.
    pub fn current_metric(&self, stage: StageId, name: &str) -> Option<f64> {
        if self.has_evaluated(stage) {
            self.metric(stage, name)
        } else {
            None
        }
    }

    pub fn safety_score(&self) -> Option<f64> {
        self.current_metric(StageId::Safety, SAFETY_SCORE)
    }

    pub fn empathy_score(&self) -> Option<f64> {
        self.current_metric(StageId::Critic, EMPATHY_SCORE)
    }

    /// Unresolved notes of a given severity posted against the current draft.
    pub fn open_notes(&self, severity: Severity) -> impl Iterator<Item = (&String, &BlackboardNote)> {
        let version = self.draft_version();
        self.blackboard_notes.iter().filter(move |(_, note)| {
            !note.resolved && note.severity == severity && note.draft_version == version
        })
    }

    /// Unresolved notes that `stage` is entitled to resolve, on any version.
    pub fn notes_resolvable_by(&self, stage: StageId) -> impl Iterator<Item = (&String, &BlackboardNote)> {
        self.blackboard_notes
            .iter()
            .filter(move |(_, note)| !note.resolved && note.resolver() == stage)
    }

    /// Human decision as it applies to the current draft version.
    ///
    /// A decision recorded for an older draft no longer applies, so the
    /// current draft is `Pending` until the gateway records a new one.
    pub fn effective_decision(&self) -> HumanDecision {
        match &self.human_decision {
            Some(review) if review.draft_version == self.draft_version() => review.decision,
            _ => HumanDecision::Pending,
        }
    }

    /// Guidance text attached to a decision on the current draft, if any.
    pub fn current_guidance(&self) -> Option<&str> {
        match &self.human_decision {
            Some(review) if review.draft_version == self.draft_version() => {
                review.guidance.as_deref()
            }
            _ => None,
        }
    }

    pub fn signal(&self, stage: StageId) -> Option<&Value> {
        self.intent_signals.get(&stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_draft() -> SessionState {
        let mut state = SessionState::new(
            "s-1".to_string(),
            "Help me manage exam stress".to_string(),
            "openai".to_string(),
        );
        state.draft_history.push(DraftVersion {
            version: 1,
            author: StageId::Drafting,
            text: "draft one".to_string(),
        });
        state.current_draft = "draft one".to_string();
        state
    }

    #[test]
    fn test_new_state_is_empty() {
        let state = SessionState::new("s".to_string(), "p".to_string(), "groq".to_string());
        assert_eq!(state.draft_version(), 0);
        assert!(!state.has_draft());
        assert_eq!(state.effective_decision(), HumanDecision::Pending);
        assert!(state.safety_score().is_none());
    }

    #[test]
    fn test_current_metric_ignores_stale_evaluations() {
        let mut state = state_with_draft();
        state
            .metrics
            .entry(StageId::Safety)
            .or_default()
            .insert(SAFETY_SCORE.to_string(), 0.9);
        state.evaluations.insert(StageId::Safety, 1);
        assert_eq!(state.safety_score(), Some(0.9));

        state.draft_history.push(DraftVersion {
            version: 2,
            author: StageId::Drafting,
            text: "draft two".to_string(),
        });
        assert_eq!(state.safety_score(), None);
        assert_eq!(state.metric(StageId::Safety, SAFETY_SCORE), Some(0.9));
    }

    #[test]
    fn test_review_without_cycle_flag_reads_as_uncounted() {
        let review: HumanReview = serde_json::from_value(serde_json::json!({
            "decision": "rejected",
            "draft_version": 2
        }))
        .unwrap();
        assert!(!review.cycle_opened);
        assert_eq!(review.guidance, None);
    }

    #[test]
    fn test_effective_decision_pins_to_draft_version() {
        let mut state = state_with_draft();
        state.human_decision = Some(HumanReview {
            decision: HumanDecision::Rejected,
            guidance: Some("tone too clinical".to_string()),
            draft_version: 1,
            cycle_opened: false,
        });
        assert_eq!(state.effective_decision(), HumanDecision::Rejected);
        assert_eq!(state.current_guidance(), Some("tone too clinical"));

        state.draft_history.push(DraftVersion {
            version: 2,
            author: StageId::Drafting,
            text: "draft two".to_string(),
        });
        assert_eq!(state.effective_decision(), HumanDecision::Pending);
        assert_eq!(state.current_guidance(), None);
    }

    #[test]
    fn test_note_resolver_defaults_to_author() {
        let note = BlackboardNote {
            author: StageId::Critic,
            severity: Severity::Blocking,
            content: "escalated".to_string(),
            resolved: false,
            draft_version: 1,
            assignee: Some(StageId::Drafting),
        };
        assert_eq!(note.resolver(), StageId::Drafting);

        let note = BlackboardNote { assignee: None, ..note };
        assert_eq!(note.resolver(), StageId::Critic);
    }

    #[test]
    fn test_verdict_parsing() {
        assert_eq!("approve".parse::<Verdict>().unwrap(), Verdict::Approve);
        assert_eq!("Rejected".parse::<Verdict>().unwrap(), Verdict::Reject);
        assert!("maybe".parse::<Verdict>().is_err());
    }

    #[test]
    fn test_state_serializes_stage_keys_as_strings() {
        let mut state = state_with_draft();
        state.evaluations.insert(StageId::Critic, 1);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["evaluations"]["critic"], 1);

        let back: SessionState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
