//! The bounded append-only log, one per session.
//!
//! Entries carry a stream id that is monotonic within the session;
//! ordering equals publish order. Each publish trims the log to the
//! configured maximum length and refreshes the session's TTL. Entries
//! are also appended to a per-session JSONL file so another process can
//! replay after a restart.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;

use crate::permissions::PermissionState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEntry {
    pub stream_id: u64,
    pub session_id: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// Where a read starts. Parsed from the wire values `"0"` (beginning),
/// `"$"` (only new), or a concrete stream id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPos {
    Start,
    End,
    After(u64),
}

impl std::str::FromStr for StreamPos {
    type Err = co_domain::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" => Ok(StreamPos::Start),
            "$" => Ok(StreamPos::End),
            other => other
                .parse::<u64>()
                .map(StreamPos::After)
                .map_err(|_| co_domain::Error::Other(format!("invalid stream position: {other}"))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-session state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SessionLog {
    entries: VecDeque<StreamEntry>,
    next_id: u64,
    last_activity: Instant,
    connected: bool,
    active: bool,
    notify: Arc<Notify>,
}

impl SessionLog {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_id: 1,
            last_activity: Instant::now(),
            connected: false,
            active: false,
            notify: Arc::new(Notify::new()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EventLog {
    sessions: RwLock<HashMap<String, SessionLog>>,
    permissions: PermissionState,
    max_len: usize,
    ttl: Duration,
    /// Snapshot directory; `None` disables persistence (tests).
    state_dir: Option<PathBuf>,
}

impl EventLog {
    pub fn new(state_dir: Option<PathBuf>, max_len: usize, ttl: Duration) -> Self {
        if let Some(dir) = &state_dir {
            if let Err(e) = std::fs::create_dir_all(dir.join("streams")) {
                tracing::warn!(error = %e, "event log persistence disabled");
            }
        }
        Self {
            sessions: RwLock::new(HashMap::new()),
            permissions: PermissionState::new(),
            max_len,
            ttl,
            state_dir,
        }
    }

    pub fn permissions(&self) -> &PermissionState {
        &self.permissions
    }

    // ── Publish / read ────────────────────────────────────────────

    /// Append an entry; trim to max length; refresh the TTL. Returns
    /// the assigned stream id.
    pub fn publish(&self, session_id: &str, entry_type: &str, payload: Value) -> u64 {
        let (entry, notify) = {
            let mut sessions = self.sessions.write();
            self.expire_idle(&mut sessions);
            let log = sessions
                .entry(session_id.to_owned())
                .or_insert_with(SessionLog::new);

            let entry = StreamEntry {
                stream_id: log.next_id,
                session_id: session_id.to_owned(),
                entry_type: entry_type.to_owned(),
                payload,
                timestamp: Utc::now(),
            };
            log.next_id += 1;
            log.last_activity = Instant::now();
            log.entries.push_back(entry.clone());
            while log.entries.len() > self.max_len {
                log.entries.pop_front();
            }
            (entry, log.notify.clone())
        };

        self.persist(&entry);
        notify.notify_waiters();
        entry.stream_id
    }

    /// Entries strictly after `start`, oldest first, up to `max_count`.
    /// Returns the entries and the highest stream id currently in the
    /// log (0 when empty).
    pub fn read_from(
        &self,
        session_id: &str,
        start: StreamPos,
        max_count: usize,
    ) -> (Vec<StreamEntry>, u64) {
        let sessions = self.sessions.read();
        let Some(log) = sessions.get(session_id) else {
            return (Vec::new(), 0);
        };
        let last_id = log.entries.back().map(|e| e.stream_id).unwrap_or(0);
        let after = match start {
            StreamPos::Start => 0,
            StreamPos::End => last_id,
            StreamPos::After(id) => id,
        };
        let entries = log
            .entries
            .iter()
            .filter(|e| e.stream_id > after)
            .take(max_count)
            .cloned()
            .collect();
        (entries, last_id)
    }

    /// Long-poll: like [`read_from`] but waits up to `timeout` for new
    /// entries when there are none past `start`.
    pub async fn read_blocking(
        &self,
        session_id: &str,
        start: StreamPos,
        max_count: usize,
        timeout: Duration,
    ) -> Vec<StreamEntry> {
        // Pin "only new" to the id observed now; otherwise every poll
        // would re-resolve it past the entries it is waiting for.
        let start = match start {
            StreamPos::End => {
                let (_, last) = self.read_from(session_id, StreamPos::End, 0);
                StreamPos::After(last)
            }
            other => other,
        };
        let deadline = Instant::now() + timeout;
        loop {
            let notify = {
                let mut sessions = self.sessions.write();
                sessions
                    .entry(session_id.to_owned())
                    .or_insert_with(SessionLog::new)
                    .notify
                    .clone()
            };
            let notified = notify.notified();

            let (entries, _) = self.read_from(session_id, start, max_count);
            if !entries.is_empty() {
                return entries;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Vec::new();
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(remaining) => return Vec::new(),
            }
        }
    }

    // ── Connection / activity flags ───────────────────────────────

    pub fn set_connection_status(&self, session_id: &str, connected: bool) {
        let mut sessions = self.sessions.write();
        let log = sessions
            .entry(session_id.to_owned())
            .or_insert_with(SessionLog::new);
        log.connected = connected;
        log.last_activity = Instant::now();
    }

    pub fn is_connected(&self, session_id: &str) -> bool {
        self.sessions
            .read()
            .get(session_id)
            .map(|l| l.connected)
            .unwrap_or(false)
    }

    /// Mark whether a generation is in flight for the session.
    pub fn set_active(&self, session_id: &str, active: bool) {
        let mut sessions = self.sessions.write();
        let log = sessions
            .entry(session_id.to_owned())
            .or_insert_with(SessionLog::new);
        log.active = active;
        log.last_activity = Instant::now();
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.sessions
            .read()
            .get(session_id)
            .map(|l| l.active)
            .unwrap_or(false)
    }

    /// Drop all stream state for a session (session deletion).
    pub fn remove_session(&self, session_id: &str) {
        self.sessions.write().remove(session_id);
        self.permissions.remove_session(session_id);
        if let Some(dir) = &self.state_dir {
            let _ = std::fs::remove_file(dir.join("streams").join(format!("{session_id}.jsonl")));
        }
    }

    // ── Internals ─────────────────────────────────────────────────

    /// Drop sessions idle past the TTL. Called under the write lock on
    /// every publish; disconnected idle sessions simply age out.
    fn expire_idle(&self, sessions: &mut HashMap<String, SessionLog>) {
        let ttl = self.ttl;
        sessions.retain(|session_id, log| {
            let keep = log.connected || log.active || log.last_activity.elapsed() < ttl;
            if !keep {
                tracing::debug!(session_id, "event stream expired");
            }
            keep
        });
    }

    fn persist(&self, entry: &StreamEntry) {
        let Some(dir) = &self.state_dir else { return };
        let path = dir
            .join("streams")
            .join(format!("{}.jsonl", entry.session_id));
        let json = match serde_json::to_string(entry) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode stream entry");
                return;
            }
        };
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{json}") {
                    tracing::warn!(error = %e, "failed to persist stream entry");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to open stream snapshot"),
        }
    }

    /// Rehydrate a session's log from its JSONL snapshot, keeping the
    /// newest `max_len` entries. Used when a fresh process replays a
    /// session it never served.
    pub fn load_snapshot(&self, session_id: &str) -> usize {
        let Some(dir) = &self.state_dir else { return 0 };
        let path = dir.join("streams").join(format!("{session_id}.jsonl"));
        let Ok(content) = std::fs::read_to_string(&path) else {
            return 0;
        };

        let mut entries: VecDeque<StreamEntry> = VecDeque::new();
        for line in content.lines() {
            if let Ok(entry) = serde_json::from_str::<StreamEntry>(line) {
                entries.push_back(entry);
            }
        }
        while entries.len() > self.max_len {
            entries.pop_front();
        }
        let count = entries.len();
        let next_id = entries.back().map(|e| e.stream_id + 1).unwrap_or(1);

        let mut sessions = self.sessions.write();
        let log = sessions
            .entry(session_id.to_owned())
            .or_insert_with(SessionLog::new);
        if log.entries.is_empty() {
            log.entries = entries;
            log.next_id = next_id;
        }
        count
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
