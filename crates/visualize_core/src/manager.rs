//! crates/visualize_core/src/manager.rs
//!
//! The session manager: create/read/update/delete/cleanup/stats over a
//! persistent store with an in-process fallback.
//!
//! The persistent store is chosen once, at construction. Each call that fails
//! against it degrades on its own to the fallback mapping; the next call tries
//! the persistent store again. Backend failures never reach the caller of
//! `create`, `update` or `delete`; they are only logged.
//!
//! The periodic sweep shares the backends with foreground requests without
//! extra locking. Every backend operation is atomic per key, so the worst a
//! race can produce is a read observing a record that was just swept as
//! `NotFound`.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::domain::{NewSession, SessionRecord, SessionUpdate};
use crate::expiry::ExpiryPolicy;
use crate::memory::{InMemoryBackend, Lookup};
use crate::ports::{PortError, PortResult, SessionBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Persistent,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub active_sessions: usize,
    pub ttl_minutes: f64,
    pub backend: BackendKind,
}

/// One instance per process, shared by every request handler.
pub struct SessionManager {
    persistent: Option<Arc<dyn SessionBackend>>,
    fallback: InMemoryBackend,
    policy: ExpiryPolicy,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// `persistent` is `Some` when a persistent store is configured.
    pub fn new(persistent: Option<Arc<dyn SessionBackend>>, policy: ExpiryPolicy) -> Self {
        let manager = Self {
            persistent,
            fallback: InMemoryBackend::new(),
            policy,
            clock: Arc::new(SystemClock),
            shutdown: CancellationToken::new(),
            cleanup_task: Mutex::new(None),
        };
        match manager.backend_kind() {
            BackendKind::Persistent => info!("SessionManager: using the persistent store"),
            BackendKind::Memory => info!("SessionManager: using in-memory storage (no persistent store configured)"),
        }
        manager
    }

    pub fn in_memory(policy: ExpiryPolicy) -> Self {
        Self::new(None, policy)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn backend_kind(&self) -> BackendKind {
        if self.persistent.is_some() {
            BackendKind::Persistent
        } else {
            BackendKind::Memory
        }
    }

    pub fn policy(&self) -> ExpiryPolicy {
        self.policy
    }

    //=====================================================================================
    // Foreground operations
    //=====================================================================================

    /// Commits a new record. Never fails: if the persistent store rejects the
    /// write, the record is kept in memory for the lifetime of the process.
    pub async fn create(&self, session_id: &str, new: NewSession) {
        let record = new.into_record(session_id, self.policy.extend(self.clock.now()));

        if let Some(store) = &self.persistent {
            match store.upsert(&record).await {
                Ok(()) => {
                    debug!(session_id, "Session stored");
                    return;
                }
                Err(e) => {
                    warn!(session_id, error = %e, "Persistent create failed; keeping session in memory");
                }
            }
        }
        self.fallback.insert(record).await;
    }

    /// Returns the live record and slides its expiry forward.
    ///
    /// `NotFound` covers unknown, expired and concurrently deleted sessions.
    /// `Unavailable` is returned only when the persistent store failed and the
    /// fallback mapping has no copy either, so callers can tell an outage from
    /// a missing session.
    pub async fn get(&self, session_id: &str) -> PortResult<SessionRecord> {
        let now = self.clock.now();
        let expires_at = self.policy.extend(now);

        if let Some(store) = &self.persistent {
            match store.get_live(session_id, now).await {
                Ok(Some(mut record)) => {
                    if let Err(e) = store.update(session_id, &SessionUpdate::default(), expires_at).await {
                        warn!(session_id, error = %e, "Failed to refresh session expiry");
                    }
                    record.expires_at = expires_at;
                    return Ok(record);
                }
                // Sessions created while the store was failing only exist in memory.
                Ok(None) => {}
                Err(e) => {
                    warn!(session_id, error = %e, "Persistent read failed; checking in-memory fallback");
                    return match self.fallback.get_and_touch(session_id, now, expires_at).await {
                        Lookup::Live(record) => Ok(record),
                        // Created during an outage; the fallback copy is the only one.
                        Lookup::Expired => Err(not_found(session_id)),
                        Lookup::Missing => Err(PortError::Unavailable(format!(
                            "Session store unreachable while reading {session_id}"
                        ))),
                    };
                }
            }
        }

        self.fallback
            .get_and_touch(session_id, now, expires_at)
            .await
            .live()
            .ok_or_else(|| not_found(session_id))
    }

    /// Replaces the supplied fields and refreshes the expiry. Fire-and-forget:
    /// failures are logged and an unknown id is ignored.
    pub async fn update(&self, session_id: &str, changes: SessionUpdate) {
        let expires_at = self.policy.extend(self.clock.now());
        let mut matched = false;

        if let Some(store) = &self.persistent {
            match store.update(session_id, &changes, expires_at).await {
                Ok(found) => matched = found,
                Err(e) => error!(session_id, error = %e, "Persistent update failed"),
            }
        }
        if self.fallback.apply(session_id, &changes, expires_at).await {
            matched = true;
        }

        if !matched {
            debug!(session_id, "Update matched no session");
        }
    }

    /// Returns whether a record was removed. A failing persistent store counts
    /// as "not removed".
    pub async fn delete(&self, session_id: &str) -> bool {
        let mut existed = self.fallback.remove(session_id).await;

        if let Some(store) = &self.persistent {
            match store.delete(session_id).await {
                Ok(found) => existed |= found,
                Err(e) => error!(session_id, error = %e, "Persistent delete failed"),
            }
        }
        existed
    }

    /// True when the session is live. Like `get`, this slides its expiry.
    pub async fn exists(&self, session_id: &str) -> bool {
        self.get(session_id).await.is_ok()
    }

    //=====================================================================================
    // Maintenance
    //=====================================================================================

    /// Drops every session from both backends and returns how many went.
    pub async fn clear(&self) -> usize {
        let mut removed = self.fallback.clear().await;

        if let Some(store) = &self.persistent {
            match store.delete_all().await {
                Ok(n) => removed += n,
                Err(e) => error!(error = %e, "Failed to clear the persistent store"),
            }
        }
        info!(removed, "Cleared all sessions");
        removed
    }

    /// Removes every expired record from both backends and returns the count.
    pub async fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut removed = self.fallback.remove_expired(now).await;

        if let Some(store) = &self.persistent {
            match store.delete_expired(now).await {
                Ok(n) => removed += n,
                Err(e) => error!(error = %e, "Cleanup of the persistent store failed"),
            }
        }

        if removed > 0 {
            info!(removed, "Cleaned up expired sessions");
        }
        removed
    }

    pub async fn stats(&self) -> SessionStats {
        let now = self.clock.now();
        let mut active_sessions = self.fallback.live_count(now).await;

        if let Some(store) = &self.persistent {
            match store.count_live(now).await {
                Ok(n) => active_sessions += n,
                Err(e) => warn!(error = %e, "Failed to count persistent sessions"),
            }
        }

        SessionStats {
            active_sessions,
            ttl_minutes: self.policy.ttl_minutes(),
            backend: self.backend_kind(),
        }
    }

    /// Starts the periodic expiry sweep. The first sweep runs one full
    /// `interval` after the call. Calling this again replaces the running task.
    pub async fn spawn_cleanup(self: &Arc<Self>, interval: Duration) {
        let manager = Arc::clone(self);
        let token = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.cleanup().await;
                    }
                }
            }
            debug!("Session cleanup task stopped");
        });

        if let Some(previous) = self.cleanup_task.lock().await.replace(handle) {
            previous.abort();
        }
        info!(interval_secs = interval.as_secs(), "Session cleanup scheduled");
    }

    /// Cancels the cleanup sweep and waits for it to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.cleanup_task.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Session cleanup task ended abnormally");
            }
        }
    }
}

fn not_found(session_id: &str) -> PortError {
    PortError::NotFound(format!("Session {session_id} not found or expired"))
}
