use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::PersistenceError;
use crate::orchestrator::{CheckpointRecord, SessionMeta};

use super::{CheckpointStore, StoreResult, check_next_seq};

#[derive(Debug, Clone)]
struct SessionLog {
    meta: SessionMeta,
    records: Vec<CheckpointRecord>,
}

/// In-memory store for tests and embedding. Same sequencing rules as the
/// file store, no durability.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    sessions: RwLock<HashMap<String, SessionLog>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn create_session(&self, meta: &SessionMeta) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&meta.session_id) {
            return Err(PersistenceError::SessionExists(meta.session_id.clone()));
        }
        sessions.insert(
            meta.session_id.clone(),
            SessionLog {
                meta: meta.clone(),
                records: Vec::new(),
            },
        );
        Ok(())
    }

    async fn session(&self, session_id: &str) -> StoreResult<Option<SessionMeta>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).map(|log| log.meta.clone()))
    }

    async fn list_sessions(&self) -> StoreResult<Vec<SessionMeta>> {
        let sessions = self.sessions.read().await;
        let mut metas: Vec<SessionMeta> = sessions.values().map(|log| log.meta.clone()).collect();
        metas.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(metas)
    }

    async fn append(&self, record: &CheckpointRecord) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        let log = sessions
            .get_mut(&record.session_id)
            .ok_or_else(|| PersistenceError::UnknownSession(record.session_id.clone()))?;

        let latest = log.records.last().map(|r| r.seq).unwrap_or(0);
        check_next_seq(record, latest)?;
        log.records.push(record.clone());
        Ok(())
    }

    async fn latest(&self, session_id: &str) -> StoreResult<Option<CheckpointRecord>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .and_then(|log| log.records.last().cloned()))
    }

    async fn get(&self, session_id: &str, seq: u64) -> StoreResult<Option<CheckpointRecord>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).and_then(|log| {
            seq.checked_sub(1)
                .and_then(|index| log.records.get(index as usize))
                .cloned()
        }))
    }

    async fn list(&self, session_id: &str) -> StoreResult<Vec<CheckpointRecord>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .map(|log| log.records.clone())
            .unwrap_or_default())
    }
}
