//! Session event fan-out.
//!
//! Every checkpoint that reaches durable storage is announced on a broadcast
//! channel. Subscribers get a per-session stream; a slow subscriber that
//! falls behind skips the missed events and can re-read the history.

use chrono::{DateTime, Utc};
use futures::Stream;
use futures::stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::models::StageId;

use super::orchestration_state::{CheckpointRecord, OutcomeMarker};

/// Announcement of a newly persisted checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: String,
    pub seq: u64,
    pub stage_just_run: Option<StageId>,
    pub outcome: OutcomeMarker,
    pub timestamp: DateTime<Utc>,
}

impl From<&CheckpointRecord> for SessionEvent {
    fn from(record: &CheckpointRecord) -> Self {
        Self {
            session_id: record.session_id.clone(),
            seq: record.seq,
            stage_just_run: record.stage_just_run,
            outcome: record.outcome.clone(),
            timestamp: record.timestamp,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.sender.send(event);
    }

    /// Stream of events for one session, in commit order.
    pub fn subscribe(&self, session_id: &str) -> impl Stream<Item = SessionEvent> + Send + use<> {
        let receiver = self.sender.subscribe();
        let session_id = session_id.to_string();

        stream::unfold((receiver, session_id), |(mut receiver, session_id)| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if event.session_id == session_id => {
                        return Some((event, (receiver, session_id)));
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            "Event subscriber for {} lagged, skipped {} events",
                            session_id, skipped
                        );
                        continue;
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
