//! Blackboard merge.
//!
//! `merge` applies a stage's delta to a session state. It validates the
//! whole delta before touching anything, so a conflicting delta leaves no
//! trace, and it never looks at draft or note content.

use std::collections::HashSet;

use crate::error::ConflictError;
use crate::models::{BlackboardNote, DraftVersion, SessionState, SessionStateDelta};

/// Apply `delta` to `state`, returning the next state.
pub fn merge(state: &SessionState, delta: SessionStateDelta) -> Result<SessionState, ConflictError> {
    validate(state, &delta)?;

    let mut next = state.clone();
    let author = delta.author;

    if let Some(text) = delta.new_draft {
        let version = next.draft_version() + 1;
        next.draft_history.push(DraftVersion {
            version,
            author,
            text: text.clone(),
        });
        next.current_draft = text;
    }

    // Notes attach to the version that is current once the delta is applied
    let version = next.draft_version();

    for note_id in delta.resolutions {
        if let Some(note) = next.blackboard_notes.get_mut(&note_id) {
            note.resolved = true;
        }
    }

    for note in delta.notes {
        next.blackboard_notes.insert(
            note.id,
            BlackboardNote {
                author,
                severity: note.severity,
                content: note.content,
                resolved: false,
                draft_version: version,
                assignee: note.assignee,
            },
        );
    }

    if let Some(signal) = delta.intent_signal {
        next.intent_signals.insert(author, signal);
    }

    if !delta.metrics.is_empty() {
        let owned = next.metrics.entry(author).or_default();
        for (name, value) in delta.metrics {
            owned.insert(name, value);
        }
    }

    next.evaluations.insert(author, version);

    Ok(next)
}

fn validate(state: &SessionState, delta: &SessionStateDelta) -> Result<(), ConflictError> {
    if delta.new_draft.is_some() && delta.base_version != state.draft_version() {
        return Err(ConflictError::StaleDraft {
            author: delta.author,
            base: delta.base_version,
            current: state.draft_version(),
        });
    }

    let mut incoming = HashSet::new();
    for note in &delta.notes {
        if state.blackboard_notes.contains_key(&note.id) || !incoming.insert(note.id.as_str()) {
            return Err(ConflictError::DuplicateNote(note.id.clone()));
        }
    }

    for note_id in &delta.resolutions {
        let note = state
            .blackboard_notes
            .get(note_id)
            .ok_or_else(|| ConflictError::UnknownNote(note_id.clone()))?;
        if note.resolver() != delta.author {
            return Err(ConflictError::UnauthorizedResolution {
                note_id: note_id.clone(),
                author: delta.author,
                resolver: note.resolver(),
            });
        }
    }

    Ok(())
}
