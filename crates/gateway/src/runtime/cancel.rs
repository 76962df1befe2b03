//! Per-session run tokens.
//!
//! The map from session id to [`CancelToken`] is both the busy
//! indicator and the cancellation handle: registering atomically claims
//! the session for one run, `take` releases it. Tokens can be awaited
//! so long waits (provider deltas, permission requests, tool HTTP) can
//! be raced against cancellation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Resolve when the token is cancelled. Safe to race in a
    /// `tokio::select!` against any suspension point.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Active runs, keyed by session id.
pub struct ActiveRuns {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl Default for ActiveRuns {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveRuns {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Claim the session for one run. Returns `None` when a run is
    /// already active (the caller queues instead).
    pub fn try_register(&self, session_id: &str) -> Option<CancelToken> {
        let mut tokens = self.tokens.lock();
        if tokens.contains_key(session_id) {
            return None;
        }
        let token = CancelToken::new();
        tokens.insert(session_id.to_owned(), token.clone());
        Some(token)
    }

    /// Remove and return the session's token (run completion).
    pub fn take(&self, session_id: &str) -> Option<CancelToken> {
        self.tokens.lock().remove(session_id)
    }

    /// Fire the session's cancel function. Idempotent; racing with
    /// natural completion is safe (the token just goes unobserved).
    pub fn cancel(&self, session_id: &str) -> bool {
        if let Some(token) = self.tokens.lock().get(session_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub fn is_busy(&self, session_id: &str) -> bool {
        self.tokens.lock().contains_key(session_id)
    }

    pub fn any_busy(&self) -> bool {
        !self.tokens.lock().is_empty()
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.tokens.lock().keys().cloned().collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
