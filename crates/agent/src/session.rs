use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::history::ConversationContext;

/// Key for one conversation, namespaced by the surface it arrives on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn telegram(chat_id: i64) -> Self {
        Self(format!("telegram:{chat_id}"))
    }

    pub fn api(user: impl fmt::Display) -> Self {
        Self(format!("api:{user}"))
    }

    pub fn cli(user: impl fmt::Display) -> Self {
        Self(format!("cli:{user}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type SharedContext = Arc<Mutex<ConversationContext>>;

/// Per-session conversation contexts, each behind its own lock.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SharedContext>>,
    max_turns: usize,
}

impl SessionRegistry {
    pub fn new(max_turns: usize) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), max_turns }
    }

    /// Returns the session's context, creating an empty one on first use.
    pub async fn session(&self, id: &SessionId) -> SharedContext {
        if let Some(existing) = self.sessions.read().await.get(id) {
            return existing.clone();
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ConversationContext::new(self.max_turns))))
            .clone()
    }

    /// Clears the session's turns. Returns false when the session never existed.
    pub async fn reset(&self, id: &SessionId) -> bool {
        let existing = self.sessions.read().await.get(id).cloned();
        match existing {
            Some(context) => {
                context.lock().await.reset();
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, id: &SessionId) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    /// Drops sessions that nobody holds and whose newest turn is older than `idle`.
    /// Empty sessions count as idle. Returns how many were dropped.
    pub async fn evict_idle(&self, idle: Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - idle;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, context| {
            // Handles are only cloned under the map lock, so a count of one means unused.
            if Arc::strong_count(context) > 1 {
                return true;
            }
            match context.try_lock() {
                Ok(context) => context.last_activity().is_some_and(|at| at >= cutoff),
                Err(_) => true,
            }
        });
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
