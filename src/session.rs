//! Per-session conversational memory.
//!
//! [`SessionStore`] is created once at startup and shared by `Arc` with the
//! query pipeline. A session comes into existence on first use, is touched
//! on every access, and disappears after `idle_timeout` without activity
//! (checked lazily on access and by [`SessionStore::sweep`]). At most
//! `max_sessions` idle sessions are kept; the least recently used one is
//! evicted to make room. A session a request holds or waits for is never
//! evicted, so the bound is exceeded while every session is in use. Each
//! session retains its last `max_turns` turns.
//!
//! Requests for the same session are serialised: [`SessionStore::acquire`]
//! hands out a [`SessionLease`] holding the session's async lock until the
//! request finishes, so each request sees every turn recorded before it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::config::SessionConfig;
use crate::llm::ChatTurn;

/// Longest accepted session key, in characters.
pub const MAX_SESSION_ID_LEN: usize = 128;

struct Entry {
    turns: Arc<AsyncMutex<Vec<ChatTurn>>>,
    last_used: Instant,
}

impl Entry {
    /// A request holds or waits for this session.
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.turns) > 1
    }

    fn idle_at(&self, now: Instant, timeout: Duration) -> bool {
        !self.in_use() && now.saturating_duration_since(self.last_used) >= timeout
    }
}

pub struct SessionStore {
    entries: Mutex<HashMap<String, Entry>>,
    idle_timeout: Duration,
    max_sessions: usize,
    max_turns: usize,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            idle_timeout: config.idle_timeout(),
            max_sessions: config.max_sessions.max(1),
            max_turns: config.max_turns,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Lock the session `id`, creating it if needed.
    ///
    /// Waits while another request holds the same session.
    pub async fn acquire(&self, id: &str) -> SessionLease {
        let turns = self.entry_at(id, Instant::now());
        SessionLease {
            guard: turns.lock_owned().await,
            max_turns: self.max_turns,
        }
    }

    fn entry_at(&self, id: &str, now: Instant) -> Arc<AsyncMutex<Vec<ChatTurn>>> {
        let mut entries = self.entries.lock();

        let expired = entries
            .get(id)
            .is_some_and(|e| e.idle_at(now, self.idle_timeout));
        if expired {
            tracing::debug!(session = id, "session expired; starting fresh");
            entries.remove(id);
        }

        if !entries.contains_key(id) && entries.len() >= self.max_sessions {
            let oldest = entries
                .iter()
                .filter(|(_, e)| !e.in_use())
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(oldest) => {
                    tracing::debug!(session = %oldest, "evicting least recently used session");
                    entries.remove(&oldest);
                }
                None => tracing::debug!(
                    live = entries.len(),
                    max_sessions = self.max_sessions,
                    "every session is in use; exceeding max_sessions"
                ),
            }
        }

        let entry = entries.entry(id.to_string()).or_insert_with(|| Entry {
            turns: Arc::new(AsyncMutex::new(Vec::new())),
            last_used: now,
        });
        entry.last_used = now;
        Arc::clone(&entry.turns)
    }

    /// Drop every session idle for at least the idle timeout. Returns the count removed.
    ///
    /// Sessions held by a request are kept.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.idle_at(now, self.idle_timeout));
        before - entries.len()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one session's turns for the duration of a request.
pub struct SessionLease {
    guard: OwnedMutexGuard<Vec<ChatTurn>>,
    max_turns: usize,
}

impl SessionLease {
    /// Prior turns, oldest first.
    pub fn history(&self) -> &[ChatTurn] {
        &self.guard
    }

    /// Append one exchange, dropping the oldest turns beyond the limit.
    pub fn record(&mut self, prompt: &str, reply: &str) {
        self.guard.push(ChatTurn::user(prompt));
        self.guard.push(ChatTurn::assistant(reply));
        let excess = self.guard.len().saturating_sub(self.max_turns);
        self.guard.drain(..excess);
    }
}
