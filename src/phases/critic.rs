use std::collections::BTreeSet;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::info;

use crate::error::CapabilityError;
use crate::models::{EMPATHY_SCORE, SessionState, SessionStateDelta, Severity, StageId};

use super::AgentAdapter;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z']+").expect("valid word pattern"));

const WARM_WORDS: &[&str] = &[
    "balanced", "better", "calm", "care", "compassionate", "courage", "curious", "deserve",
    "encourage", "friend", "gentle", "gently", "good", "help", "helpful", "hope", "hopeful",
    "kind", "kindness", "patient", "progress", "relief", "safe", "strength", "support",
    "supportive", "thank", "welcome",
];

const COLD_WORDS: &[&str] = &[
    "afraid", "angry", "anxiety", "anxious", "awful", "bad", "fail", "failure", "fear", "guilty",
    "hopeless", "hurt", "lonely", "must", "overwhelmed", "pain", "panic", "sad", "shame",
    "stupid", "terrible", "useless", "worried", "worry", "worthless", "wrong",
];

/// Normalization constant for the compound score.
const ALPHA: f64 = 15.0;

/// Lexicon tone score of `text`: (compound score in [-1, 1], cold words found).
pub fn tone(text: &str) -> (f64, BTreeSet<String>) {
    let lowered = text.to_lowercase();
    let mut sum = 0.0;
    let mut cold = BTreeSet::new();

    for word in WORD.find_iter(&lowered).map(|m| m.as_str()) {
        if WARM_WORDS.contains(&word) {
            sum += 1.0;
        } else if COLD_WORDS.contains(&word) {
            sum -= 1.0;
            cold.insert(word.to_string());
        }
    }

    let compound = sum / (sum * sum + ALPHA).sqrt();
    (compound, cold)
}

/// Map a compound score onto [0, 1].
pub fn empathy_from_compound(compound: f64) -> f64 {
    ((compound + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Built-in critic stage: lexicon-based empathy scoring.
pub struct LexiconCritic {
    target: f64,
}

impl LexiconCritic {
    pub fn new(target: f64) -> Self {
        Self { target }
    }
}

#[async_trait]
impl AgentAdapter for LexiconCritic {
    async fn invoke(
        &self,
        stage: StageId,
        state: &SessionState,
    ) -> Result<SessionStateDelta, CapabilityError> {
        let version = state.draft_version();
        let (compound, cold) = tone(&state.current_draft);
        let empathy = empathy_from_compound(compound);
        let needs_warmth = empathy < self.target;

        let own_warnings: Vec<String> = state
            .notes_resolvable_by(StageId::Critic)
            .filter(|(_, note)| note.author == StageId::Critic && note.severity == Severity::Warning)
            .map(|(id, _)| id.clone())
            .collect();
        let open_on_current = state
            .notes_resolvable_by(StageId::Critic)
            .any(|(_, note)| note.severity == Severity::Warning && note.draft_version == version);

        let mut delta = SessionStateDelta::for_state(stage, state);
        for note_id in own_warnings {
            delta = delta.resolving(note_id);
        }

        let suggestions: Vec<String> = cold
            .iter()
            .map(|w| format!("Soften or reframe '{}'", w))
            .collect();

        if state.has_evaluated(StageId::Critic) && open_on_current {
            // Second look at the same draft: hand it back to Drafting
            let note_id = format!("critic-v{}-escalation", version);
            if !state.blackboard_notes.contains_key(&note_id) {
                info!("Critic escalates {} v{} to drafting", state.session_id, version);
                delta = delta.with_assigned_note(
                    note_id,
                    Severity::Blocking,
                    format!(
                        "Empathy {:.2} is still below {:.2}; redraft with a warmer tone",
                        empathy, self.target
                    ),
                    StageId::Drafting,
                );
            }
        } else if needs_warmth {
            let note_id = format!("critic-v{}-tone", version);
            if !state.blackboard_notes.contains_key(&note_id) {
                delta = delta.with_note(
                    note_id,
                    Severity::Warning,
                    format!("Empathy {:.2} is below target {:.2}", empathy, self.target),
                );
            }
        }

        info!(
            "Empathy score for {} v{}: {:.2} (compound {:.2})",
            state.session_id, version, empathy, compound
        );

        Ok(delta.with_metric(EMPATHY_SCORE, empathy).with_signal(json!({
            "empathy": empathy,
            "needs_warmth": needs_warmth,
            "suggestions": suggestions,
        })))
    }
}
