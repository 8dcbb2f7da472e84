//! Session Store
//!
//! A session stands in for one client connection. Each has a FIFO call
//! slot so at most one tool call per session is in flight, and calls run in
//! the order they arrived.
//!
//! Spans:
//! - `busker.session.create` - session creation (new or resumed)
//! - `busker.session.expire` - removal by the cleanup sweep

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub created_at: Instant,
    pub last_seen: Instant,
    pub calls: u64,
    slot: Arc<Mutex<()>>,
}

impl Session {
    pub fn new(id: String) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_seen: now,
            calls: 0,
            slot: Arc::new(Mutex::new(())),
        }
    }

    pub fn idle_duration(&self) -> Duration {
        self.last_seen.elapsed()
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// True while a call holds or waits for the slot.
    pub fn is_busy(&self) -> bool {
        Arc::strong_count(&self.slot) > 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub total: usize,
    pub busy: usize,
}

/// In-memory session store.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume the session named by `id_hint`, or create one.
    pub fn get_or_create(&self, id_hint: Option<&str>) -> String {
        let id = id_hint
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut is_new = false;
        self.sessions.entry(id.clone()).or_insert_with(|| {
            is_new = true;
            Session::new(id.clone())
        });

        let _span = tracing::info_span!(
            "busker.session.create",
            busker.session_id = %id,
            busker.session.is_new = is_new,
        )
        .entered();
        if is_new {
            tracing::info!("Created new session");
        } else {
            tracing::debug!("Resumed existing session");
        }

        id
    }

    pub fn touch(&self, id: &str) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.touch();
        }
    }

    /// Wait for this session's turn to run a call.
    ///
    /// Waiters are served in the order they asked. Returns `None` if the
    /// session is gone.
    pub async fn acquire_turn(&self, id: &str) -> Option<OwnedMutexGuard<()>> {
        let slot = {
            let mut session = self.sessions.get_mut(id)?;
            session.calls += 1;
            session.touch();
            Arc::clone(&session.slot)
        };
        Some(slot.lock_owned().await)
    }

    pub fn calls(&self, id: &str) -> Option<u64> {
        self.sessions.get(id).map(|s| s.calls)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            tracing::info!(session_id = %id, "Session removed");
        }
        removed
    }

    /// Drop idle sessions. Sessions with a call in flight are kept.
    pub fn cleanup(&self, max_idle: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|id, session| {
            let keep = session.is_busy() || session.idle_duration() <= max_idle;
            if !keep {
                let _span = tracing::info_span!("busker.session.expire", busker.session_id = %id).entered();
                tracing::info!(idle_secs = session.idle_duration().as_secs(), "Removed stale session");
            }
            keep
        });
        let removed = before.saturating_sub(self.sessions.len());

        if removed > 0 {
            tracing::info!(
                removed = removed,
                remaining = self.sessions.len(),
                "Session cleanup completed"
            );
        }
        removed
    }

    pub fn stats(&self) -> SessionStats {
        let busy = self.sessions.iter().filter(|e| e.value().is_busy()).count();
        SessionStats {
            total: self.sessions.len(),
            busy,
        }
    }
}
