//! Checkpoint persistence.
//!
//! A store keeps, per session, a registration record and an append-only,
//! gapless sequence of checkpoint records. `append` only succeeds for
//! `latest + 1`, so two writers racing on the same session can never both
//! win the same sequence number.

mod files;
mod memory;

pub use files::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;

use async_trait::async_trait;

use crate::error::PersistenceError;
use crate::orchestrator::{CheckpointRecord, SessionMeta};

pub type StoreResult<T> = Result<T, PersistenceError>;

/// Durable, append-only checkpoint storage.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Register a new session. Fails with `SessionExists` on id reuse.
    async fn create_session(&self, meta: &SessionMeta) -> StoreResult<()>;

    async fn session(&self, session_id: &str) -> StoreResult<Option<SessionMeta>>;

    /// All registered sessions, oldest first.
    async fn list_sessions(&self) -> StoreResult<Vec<SessionMeta>>;

    /// Durably append `record`. Its `seq` must be exactly one past the
    /// latest stored record (1 for the first record).
    async fn append(&self, record: &CheckpointRecord) -> StoreResult<()>;

    async fn latest(&self, session_id: &str) -> StoreResult<Option<CheckpointRecord>>;

    async fn get(&self, session_id: &str, seq: u64) -> StoreResult<Option<CheckpointRecord>>;

    /// Full history, ascending by `seq`.
    async fn list(&self, session_id: &str) -> StoreResult<Vec<CheckpointRecord>>;
}

/// Check that `record` is the next entry after `latest_seq`.
pub(crate) fn check_next_seq(record: &CheckpointRecord, latest_seq: u64) -> StoreResult<()> {
    let expected = latest_seq + 1;
    if record.seq == expected {
        Ok(())
    } else if record.seq <= latest_seq {
        Err(PersistenceError::SequenceTaken {
            session_id: record.session_id.clone(),
            seq: record.seq,
        })
    } else {
        Err(PersistenceError::SequenceGap {
            session_id: record.session_id.clone(),
            expected,
            found: record.seq,
        })
    }
}
