use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::session::{SessionState, Severity, StageId};

/// A note a stage wants to post on the blackboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNote {
    /// Must not collide with any existing note id
    pub id: String,
    pub severity: Severity,
    pub content: String,
    /// Stage designated to resolve the note (defaults to the author)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<StageId>,
}

/// The incremental change a stage proposes to the session state.
///
/// The delta can only add: a new draft, new notes, resolutions of existing
/// notes, a replacement of the author's own signal and metrics. Removing
/// notes or editing earlier drafts cannot be expressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStateDelta {
    pub author: StageId,
    /// Draft version the author was looking at when it computed the delta
    pub base_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_draft: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<NewNote>,
    /// Ids of notes to mark resolved
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolutions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_signal: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
}

impl SessionStateDelta {
    pub fn new(author: StageId, base_version: u32) -> Self {
        Self {
            author,
            base_version,
            new_draft: None,
            notes: Vec::new(),
            resolutions: Vec::new(),
            intent_signal: None,
            metrics: BTreeMap::new(),
        }
    }

    /// Start a delta based on the state the author was invoked with.
    pub fn for_state(author: StageId, state: &SessionState) -> Self {
        Self::new(author, state.draft_version())
    }

    pub fn with_draft(mut self, text: impl Into<String>) -> Self {
        self.new_draft = Some(text.into());
        self
    }

    pub fn with_note(
        mut self,
        id: impl Into<String>,
        severity: Severity,
        content: impl Into<String>,
    ) -> Self {
        self.notes.push(NewNote {
            id: id.into(),
            severity,
            content: content.into(),
            assignee: None,
        });
        self
    }

    pub fn with_assigned_note(
        mut self,
        id: impl Into<String>,
        severity: Severity,
        content: impl Into<String>,
        assignee: StageId,
    ) -> Self {
        self.notes.push(NewNote {
            id: id.into(),
            severity,
            content: content.into(),
            assignee: Some(assignee),
        });
        self
    }

    pub fn resolving(mut self, note_id: impl Into<String>) -> Self {
        self.resolutions.push(note_id.into());
        self
    }

    pub fn with_signal(mut self, signal: Value) -> Self {
        self.intent_signal = Some(signal);
        self
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }
}
