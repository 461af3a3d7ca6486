use std::collections::BTreeSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use minijinja::{Environment, context};
use regex::RegexBuilder;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::CapabilityError;
use crate::models::{SessionState, SessionStateDelta, Severity, StageId};

use super::AgentAdapter;

/// Replacement for redacted phrases.
pub const REDACTION: &str = "[removed]";

const DEFAULT_TEMPLATE: &str = r#"{% if supportive %}It makes sense that this feels hard right now, and you deserve kindness while you work through it. Thank you for taking this gentle step for yourself.

{% endif %}Exercise: a thought record for "{{ prompt }}"

This is a supportive, self-paced exercise. You can pause whenever you like.

1. Notice: take a slow breath and gently write down the situation and the thought that came up.
2. Explore: ask what supports the thought and what does not. Be curious and kind with yourself.
3. Reframe: write a balanced, compassionate alternative thought, the way you would for a good friend.
{% for note in guidance %}
Reviewer guidance applied: {{ note }}
{% endfor %}
Take your time. Small steps are still progress.
"#;

/// Built-in drafting stage: renders a CBT exercise from a minijinja template.
///
/// Each new draft carries forward everything learned so far: phrases flagged
/// by Safety stay redacted, human guidance stays applied, and once Critic has
/// asked for warmth the supportive opening stays on.
pub struct TemplateDrafter {
    template: String,
}

impl TemplateDrafter {
    /// Create a drafter, validating `template` (or the default) up front.
    pub fn new(template: Option<&str>) -> Result<Self> {
        let template = template.unwrap_or(DEFAULT_TEMPLATE).to_string();
        let env = Environment::new();
        env.template_from_str(&template)
            .context("Invalid draft template")?;
        Ok(Self { template })
    }

    fn render(&self, ctx: minijinja::Value) -> Result<String, minijinja::Error> {
        Environment::new().render_str(&self.template, ctx)
    }
}

impl Default for TemplateDrafter {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

#[async_trait]
impl AgentAdapter for TemplateDrafter {
    async fn invoke(
        &self,
        stage: StageId,
        state: &SessionState,
    ) -> Result<SessionStateDelta, CapabilityError> {
        let own = state.signal(StageId::Drafting);

        let mut redacted: BTreeSet<String> = string_list(own, "redacted_terms").into_iter().collect();
        redacted.extend(string_list(state.signal(StageId::Safety), "flagged_terms"));

        let mut guidance = string_list(own, "guidance");
        let new_guidance = state.current_guidance().map(str::to_string);
        if let Some(text) = &new_guidance {
            guidance.push(text.clone());
        }

        let needs_warmth = state
            .signal(StageId::Critic)
            .and_then(|s| s.get("needs_warmth"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let supportive = needs_warmth || flag(own, "supportive");

        let version = state.draft_version() + 1;
        let rendered = self
            .render(context! {
                prompt => state.initial_prompt.trim(),
                version => version,
                guidance => guidance,
                supportive => supportive,
            })
            .map_err(|e| CapabilityError::failed(stage, format!("template render failed: {}", e)))?;
        let draft = redact(&rendered, &redacted)
            .map_err(|e| CapabilityError::failed(stage, format!("invalid redaction term: {}", e)))?;

        info!(
            "Drafting v{} for {} (redacted {}, supportive {})",
            version,
            state.session_id,
            redacted.len(),
            supportive
        );

        let mut delta = SessionStateDelta::for_state(stage, state).with_draft(draft);

        for (note_id, _) in state.notes_resolvable_by(StageId::Drafting) {
            debug!("Drafting resolves note {}", note_id);
            delta = delta.resolving(note_id.clone());
        }

        if let Some(text) = new_guidance {
            let note_id = format!("drafting-v{}-guidance", version);
            if !state.blackboard_notes.contains_key(&note_id) {
                delta = delta.with_note(
                    note_id,
                    Severity::Info,
                    format!("Applied reviewer guidance: {}", text),
                );
            }
        }

        Ok(delta.with_signal(json!({
            "redacted_terms": redacted,
            "guidance": guidance,
            "supportive": supportive,
        })))
    }
}

fn string_list(signal: Option<&Value>, key: &str) -> Vec<String> {
    signal
        .and_then(|s| s.get(key))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn flag(signal: Option<&Value>, key: &str) -> bool {
    signal
        .and_then(|s| s.get(key))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Replace every case-insensitive occurrence of each term.
fn redact(text: &str, terms: &BTreeSet<String>) -> Result<String, regex::Error> {
    let mut out = text.to_string();
    for term in terms.iter().filter(|t| !t.trim().is_empty()) {
        let pattern = RegexBuilder::new(&regex::escape(term))
            .case_insensitive(true)
            .build()?;
        out = pattern.replace_all(&out, REDACTION).into_owned();
    }
    Ok(out)
}
