//! Session store trait and the in-memory backend
//!
//! Stores persist `ConversationState` keyed by session id. A turn holds the
//! session's [`SessionGuard`] from load to save so at most one turn per
//! session runs at a time.

use crate::error::OrchestrationError;
use crate::state::ConversationState;
use crate::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};

/// Trait for session persistence
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<ConversationState>>;

    /// Persist `state`. Bumps `state.version` on success; a stale version is
    /// rejected with `OrchestrationError::State`.
    async fn save(&self, session_id: &str, state: &mut ConversationState) -> Result<()>;

    /// Exclusive access to one session for the duration of a turn
    async fn lock(&self, session_id: &str) -> SessionGuard;
}

/// Held for the duration of a turn; dropping it releases the session.
pub struct SessionGuard {
    session_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Per-session async mutexes shared by the store backends.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, session_id: &str) -> SessionGuard {
        let lock = {
            // A poisoned map only means another thread panicked mid-insert;
            // the map itself is still usable.
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

            // Drop entries nobody is waiting on
            locks.retain(|id, lock| id == session_id || Arc::strong_count(lock) > 1);

            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        SessionGuard {
            session_id: session_id.to_string(),
            _guard: lock.lock_owned().await,
        }
    }
}

/// In-memory session store for development and tests
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, ConversationState>>>,
    locks: SessionLocks,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            locks: SessionLocks::new(),
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<ConversationState>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, state: &mut ConversationState) -> Result<()> {
        if state.session_id != session_id {
            return Err(OrchestrationError::State(format!(
                "state for session {} cannot be saved under {}",
                state.session_id, session_id
            )));
        }

        let mut sessions = self.sessions.write().await;

        let stored_version = sessions.get(session_id).map(|s| s.version).unwrap_or(0);
        if stored_version != state.version {
            return Err(OrchestrationError::State(format!(
                "stale write for session {}: stored version {}, got {}",
                session_id, stored_version, state.version
            )));
        }

        state.version += 1;
        sessions.insert(session_id.to_string(), state.clone());
        Ok(())
    }

    async fn lock(&self, session_id: &str) -> SessionGuard {
        self.locks.acquire(session_id).await
    }
}
