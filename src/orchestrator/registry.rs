use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Session Registry for Concurrent Session Management
// ============================================================================

/// Per-session coordination handles.
#[derive(Debug, Clone)]
pub struct SessionSlot {
    /// Serializes steps, resumes and cancels of one session
    pub lock: Arc<Mutex<()>>,
    /// Tripped by `cancel`; in-flight adapter calls observe it
    pub cancel: CancellationToken,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            cancel: CancellationToken::new(),
        }
    }
}

/// Registry of session slots, shared by every caller in this process.
/// Uses RwLock for the map (many reads, few writes) and a Mutex per session,
/// so different sessions run in parallel while one session runs serially.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionSlot>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the slot for `session_id`.
    pub async fn get_or_create(&self, session_id: &str) -> SessionSlot {
        {
            let sessions = self.sessions.read().await;
            if let Some(slot) = sessions.get(session_id) {
                return slot.clone();
            }
        }

        let mut sessions = self.sessions.write().await;
        // Double-check in case another task created it
        if let Some(slot) = sessions.get(session_id) {
            return slot.clone();
        }

        let slot = SessionSlot::new();
        sessions.insert(session_id.to_string(), slot.clone());
        slot
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionSlot> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).cloned()
    }

    /// Acquire exclusive access to a session.
    pub async fn lock_session(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let slot = self.get_or_create(session_id).await;
        slot.lock.lock_owned().await
    }

    /// Token that fires when the session is cancelled.
    pub async fn cancel_token(&self, session_id: &str) -> CancellationToken {
        self.get_or_create(session_id).await.cancel
    }

    /// Arm a fresh token after a cancel that could not be recorded.
    /// The lock is kept, so holders of the old slot still serialize.
    pub async fn reset_cancel(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(slot) = sessions.get_mut(session_id) {
            slot.cancel = CancellationToken::new();
        }
    }

    /// Forget a session that has reached a terminal checkpoint.
    pub async fn remove(&self, session_id: &str) -> Option<SessionSlot> {
        self.sessions.write().await.remove(session_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_slot_for_same_session() {
        let registry = SessionRegistry::new();
        let a = registry.get_or_create("s-1").await;
        let b = registry.get_or_create("s-1").await;
        assert!(Arc::ptr_eq(&a.lock, &b.lock));

        a.cancel.cancel();
        assert!(registry.cancel_token("s-1").await.is_cancelled());
        assert!(!registry.cancel_token("s-2").await.is_cancelled());
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_per_session() {
        let registry = Arc::new(SessionRegistry::new());
        let guard = registry.lock_session("s-1").await;

        let contender = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let _guard = registry.lock_session("s-1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // Other sessions are not blocked
        let _other = registry.lock_session("s-2").await;

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_cancel_keeps_lock() {
        let registry = SessionRegistry::new();
        let slot = registry.get_or_create("s-1").await;
        slot.cancel.cancel();

        registry.reset_cancel("s-1").await;
        let fresh = registry.get_or_create("s-1").await;
        assert!(!fresh.cancel.is_cancelled());
        assert!(Arc::ptr_eq(&slot.lock, &fresh.lock));

        // Unknown sessions are left alone
        registry.reset_cancel("s-2").await;
        assert!(registry.get("s-2").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_forgets_slot() {
        let registry = SessionRegistry::new();
        registry.get_or_create("s-1").await;
        registry.get_or_create("s-2").await;
        assert_eq!(registry.len().await, 2);

        assert!(registry.remove("s-1").await.is_some());
        assert!(registry.get("s-1").await.is_none());
        assert!(registry.remove("s-1").await.is_none());
        assert_eq!(registry.len().await, 1);
    }
}
