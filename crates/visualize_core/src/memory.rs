//! crates/visualize_core/src/memory.rs
//!
//! In-process session store. Serves as the whole backend when no persistent
//! store is configured, and as the fallback mapping when one is.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::{SessionRecord, SessionUpdate};
use crate::ports::{PortResult, SessionBackend};

/// Outcome of a touching read.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Live(SessionRecord),
    /// The record existed but had expired and has now been evicted.
    Expired,
    Missing,
}

impl Lookup {
    pub fn live(self) -> Option<SessionRecord> {
        match self {
            Lookup::Live(record) => Some(record),
            Lookup::Expired | Lookup::Missing => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: SessionRecord) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(record.session_id.clone(), record);
    }

    /// Returns a copy of the live record after moving its expiry to `expires_at`.
    /// An expired record is evicted on the spot.
    pub async fn get_and_touch(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Lookup {
        let mut sessions = self.sessions.write().await;
        let Some(record) = sessions.get_mut(session_id) else {
            return Lookup::Missing;
        };
        if now >= record.expires_at {
            sessions.remove(session_id);
            return Lookup::Expired;
        }
        record.expires_at = expires_at;
        Lookup::Live(record.clone())
    }

    pub async fn apply(&self, session_id: &str, changes: &SessionUpdate, expires_at: DateTime<Utc>) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(record) => {
                changes.apply_to(record);
                record.expires_at = expires_at;
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    pub async fn remove_expired(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, record| now < record.expires_at);
        before - sessions.len()
    }

    pub async fn live_count(&self, now: DateTime<Utc>) -> usize {
        let sessions = self.sessions.read().await;
        sessions.values().filter(|r| now < r.expires_at).count()
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn clear(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.len();
        sessions.clear();
        removed
    }
}

#[async_trait]
impl SessionBackend for InMemoryBackend {
    async fn upsert(&self, record: &SessionRecord) -> PortResult<()> {
        self.insert(record.clone()).await;
        Ok(())
    }

    async fn get_live(&self, session_id: &str, now: DateTime<Utc>) -> PortResult<Option<SessionRecord>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .filter(|r| now < r.expires_at)
            .cloned())
    }

    async fn update(
        &self,
        session_id: &str,
        changes: &SessionUpdate,
        expires_at: DateTime<Utc>,
    ) -> PortResult<bool> {
        Ok(self.apply(session_id, changes, expires_at).await)
    }

    async fn delete(&self, session_id: &str) -> PortResult<bool> {
        Ok(self.remove(session_id).await)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> PortResult<usize> {
        Ok(self.remove_expired(now).await)
    }

    async fn count_live(&self, now: DateTime<Utc>) -> PortResult<usize> {
        Ok(self.live_count(now).await)
    }

    async fn delete_all(&self) -> PortResult<usize> {
        Ok(self.clear().await)
    }
}
