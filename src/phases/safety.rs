use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::error::CapabilityError;
use crate::models::{SAFETY_SCORE, SessionState, SessionStateDelta, Severity, StageId};

use super::AgentAdapter;

/// Score assigned to a draft with no prohibited phrase.
pub const CLEAN_SCORE: f64 = 1.0;
/// Cap applied as soon as one prohibited phrase is present.
pub const VIOLATION_CAP: f64 = 0.2;

/// Built-in safety stage: flags lines containing prohibited phrases.
pub struct KeywordSafetyReviewer {
    phrases: Vec<String>,
}

impl KeywordSafetyReviewer {
    pub fn new(phrases: &[String]) -> Self {
        Self {
            phrases: phrases
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// (1-based line number, phrases found on that line)
    fn scan(&self, draft: &str) -> Vec<(usize, Vec<&str>)> {
        draft
            .lines()
            .enumerate()
            .filter_map(|(index, line)| {
                let lowered = line.to_lowercase();
                let hits: Vec<&str> = self
                    .phrases
                    .iter()
                    .filter(|p| lowered.contains(p.as_str()))
                    .map(String::as_str)
                    .collect();
                (!hits.is_empty()).then_some((index + 1, hits))
            })
            .collect()
    }
}

#[async_trait]
impl AgentAdapter for KeywordSafetyReviewer {
    async fn invoke(
        &self,
        stage: StageId,
        state: &SessionState,
    ) -> Result<SessionStateDelta, CapabilityError> {
        let version = state.draft_version();
        let findings = self.scan(&state.current_draft);

        let mut delta = SessionStateDelta::for_state(stage, state);

        // Earlier drafts were superseded, so their findings no longer apply
        for (note_id, note) in state.notes_resolvable_by(StageId::Safety) {
            if note.author == StageId::Safety && note.draft_version < version {
                delta = delta.resolving(note_id.clone());
            }
        }

        let mut flagged_terms = BTreeSet::new();
        let mut flagged_lines = Vec::new();
        for (line, hits) in &findings {
            let note_id = format!("safety-v{}-line{}", version, line);
            flagged_lines.push(*line);
            flagged_terms.extend(hits.iter().map(|h| h.to_string()));

            if state.blackboard_notes.contains_key(&note_id) {
                continue;
            }
            let quoted: Vec<String> = hits.iter().map(|h| format!("'{}'", h)).collect();
            delta = delta.with_note(
                note_id,
                Severity::Blocking,
                format!(
                    "Line {} contains prohibited phrase(s): {}",
                    line,
                    quoted.join(", ")
                ),
            );
        }

        let score = if findings.is_empty() {
            CLEAN_SCORE
        } else {
            warn!(
                "Safety flagged {} line(s) in {} v{}: {:?}",
                findings.len(),
                state.session_id,
                version,
                flagged_terms
            );
            VIOLATION_CAP
        };
        info!("Safety score for {} v{}: {:.2}", state.session_id, version, score);

        Ok(delta.with_metric(SAFETY_SCORE, score).with_signal(json!({
            "flagged_terms": flagged_terms,
            "flagged_lines": flagged_lines,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PROHIBITED_PHRASES;
    use crate::orchestrator::merge;

    fn reviewer() -> KeywordSafetyReviewer {
        let phrases: Vec<String> = DEFAULT_PROHIBITED_PHRASES.iter().map(|p| p.to_string()).collect();
        KeywordSafetyReviewer::new(&phrases)
    }

    fn with_draft(text: &str) -> SessionState {
        let state = SessionState::new("s".to_string(), "p".to_string(), "openai".to_string());
        merge(&state, SessionStateDelta::for_state(StageId::Drafting, &state).with_draft(text)).unwrap()
    }

    #[tokio::test]
    async fn test_clean_draft_scores_full() {
        let state = with_draft("Breathe slowly.\nNotice the thought.");
        let delta = reviewer().invoke(StageId::Safety, &state).await.unwrap();

        assert_eq!(delta.metrics[SAFETY_SCORE], CLEAN_SCORE);
        assert!(delta.notes.is_empty());
        assert_eq!(delta.intent_signal.unwrap()["flagged_terms"], json!([]));
    }

    #[tokio::test]
    async fn test_flagged_lines_post_blocking_notes() {
        let state = with_draft("Breathe slowly.\nCheck the DOSAGE on your prescription.\nRest.");
        let delta = reviewer().invoke(StageId::Safety, &state).await.unwrap();

        assert_eq!(delta.metrics[SAFETY_SCORE], VIOLATION_CAP);
        assert_eq!(delta.notes.len(), 1);
        assert_eq!(delta.notes[0].id, "safety-v1-line2");
        assert_eq!(delta.notes[0].severity, Severity::Blocking);

        let signal = delta.intent_signal.unwrap();
        assert_eq!(signal["flagged_terms"], json!(["dosage", "prescription"]));
        assert_eq!(signal["flagged_lines"], json!([2]));
    }

    #[tokio::test]
    async fn test_resolves_findings_on_superseded_drafts() {
        let state = with_draft("Ask about a diagnosis.");
        let delta = reviewer().invoke(StageId::Safety, &state).await.unwrap();
        let state = merge(&state, delta).unwrap();

        let state = merge(
            &state,
            SessionStateDelta::for_state(StageId::Drafting, &state).with_draft("Ask about [removed]."),
        )
        .unwrap();
        let delta = reviewer().invoke(StageId::Safety, &state).await.unwrap();
        assert_eq!(delta.resolutions, vec!["safety-v1-line1".to_string()]);

        let state = merge(&state, delta).unwrap();
        assert_eq!(state.safety_score(), Some(CLEAN_SCORE));
        assert!(state.blackboard_notes["safety-v1-line1"].resolved);
    }
}
