//! Out-of-band permission state: pending requests and the per-session
//! allowlist.
//!
//! Stored separately from the stream entries so a trimmed stream never
//! loses a permission the user has not answered yet. Pending records
//! expire after 30 minutes; once terminal they are kept 5 more minutes
//! for late readers and then swept.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use co_domain::event::PermissionRequest;

const PENDING_TTL_MINUTES: i64 = 30;
const TERMINAL_TTL_MINUTES: i64 = 5;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    Pending,
    Granted,
    Denied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPermission {
    pub request: PermissionRequest,
    pub status: PermissionStatus,
    pub expires_at: DateTime<Utc>,
}

/// One allowlist entry; `action`/`path` narrow the match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub tool_name: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    pub added_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PermissionState {
    /// (session_id, permission_id) → record.
    pending: RwLock<HashMap<(String, String), PendingPermission>>,
    /// session_id → allowlist.
    allowlist: RwLock<HashMap<String, Vec<AllowlistEntry>>>,
}

impl Default for PermissionState {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionState {
    pub fn new() -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            allowlist: RwLock::new(HashMap::new()),
        }
    }

    // ── Pending permissions ───────────────────────────────────────

    pub fn set_pending(&self, request: PermissionRequest) {
        let mut pending = self.pending.write();
        Self::sweep(&mut pending);
        let key = (request.session_id.clone(), request.id.clone());
        pending.insert(
            key,
            PendingPermission {
                request,
                status: PermissionStatus::Pending,
                expires_at: Utc::now() + ChronoDuration::minutes(PENDING_TTL_MINUTES),
            },
        );
    }

    /// Move a pending record to a terminal status and shorten its TTL.
    /// Returns false when the record is unknown or already terminal.
    pub fn update_status(
        &self,
        session_id: &str,
        permission_id: &str,
        status: PermissionStatus,
    ) -> bool {
        let mut pending = self.pending.write();
        let Some(record) = pending.get_mut(&(session_id.to_owned(), permission_id.to_owned()))
        else {
            return false;
        };
        if record.status != PermissionStatus::Pending {
            return false;
        }
        record.status = status;
        record.expires_at = Utc::now() + ChronoDuration::minutes(TERMINAL_TTL_MINUTES);
        true
    }

    /// All still-pending requests for a session, oldest first.
    pub fn all_pending(&self, session_id: &str) -> Vec<PendingPermission> {
        let mut pending = self.pending.write();
        Self::sweep(&mut pending);
        let mut records: Vec<PendingPermission> = pending
            .iter()
            .filter(|((sid, _), p)| sid == session_id && p.status == PermissionStatus::Pending)
            .map(|(_, p)| p.clone())
            .collect();
        records.sort_by_key(|p| p.request.created_at);
        records
    }

    pub fn delete_pending(&self, session_id: &str, permission_id: &str) {
        self.pending
            .write()
            .remove(&(session_id.to_owned(), permission_id.to_owned()));
    }

    fn sweep(pending: &mut HashMap<(String, String), PendingPermission>) {
        let now = Utc::now();
        pending.retain(|_, p| p.expires_at > now);
    }

    // ── Allowlist ─────────────────────────────────────────────────

    pub fn add_to_allowlist(
        &self,
        session_id: &str,
        tool_name: &str,
        action: Option<&str>,
        path: Option<&str>,
    ) {
        let mut allowlist = self.allowlist.write();
        let entries = allowlist.entry(session_id.to_owned()).or_default();
        let exists = entries.iter().any(|e| {
            e.tool_name == tool_name
                && e.action.as_deref() == action
                && e.path.as_deref() == path
        });
        if !exists {
            entries.push(AllowlistEntry {
                tool_name: tool_name.to_owned(),
                action: action.map(str::to_owned),
                path: path.map(str::to_owned),
                added_at: Utc::now(),
            });
        }
    }

    /// Allowlist match with decreasing specificity: an entry matches
    /// when its tool name equals and each of its set fields equals the
    /// invocation's. Exact `(tool, action, path)` entries therefore win
    /// over `(tool, action)`, which win over bare `tool` entries; an
    /// entry with an action/path constraint never matches a different
    /// action/path.
    pub fn is_allowed(
        &self,
        session_id: &str,
        tool_name: &str,
        action: Option<&str>,
        path: Option<&str>,
    ) -> bool {
        let allowlist = self.allowlist.read();
        let Some(entries) = allowlist.get(session_id) else {
            return false;
        };
        entries.iter().any(|e| {
            if e.tool_name != tool_name {
                return false;
            }
            if let Some(want) = &e.action {
                if action != Some(want.as_str()) {
                    return false;
                }
            }
            if let Some(want) = &e.path {
                if path != Some(want.as_str()) {
                    return false;
                }
            }
            true
        })
    }

    pub fn remove_session(&self, session_id: &str) {
        self.allowlist.write().remove(session_id);
        self.pending
            .write()
            .retain(|(sid, _), _| sid != session_id);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn req(session: &str, id: &str) -> PermissionRequest {
        PermissionRequest {
            id: id.into(),
            session_id: session.into(),
            tool_call_id: format!("tc-{id}"),
            tool_name: "bash".into(),
            description: "run a command".into(),
            action: "execute".into(),
            params: json!({"command": "ls"}),
            path: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn pending_lifecycle() {
        let state = PermissionState::new();
        state.set_pending(req("s1", "p1"));
        state.set_pending(req("s1", "p2"));
        state.set_pending(req("s2", "p3"));

        assert_eq!(state.all_pending("s1").len(), 2);
        assert_eq!(state.all_pending("s2").len(), 1);

        assert!(state.update_status("s1", "p1", PermissionStatus::Granted));
        assert_eq!(state.all_pending("s1").len(), 1);
    }

    #[test]
    fn update_status_is_idempotent() {
        let state = PermissionState::new();
        state.set_pending(req("s1", "p1"));
        assert!(state.update_status("s1", "p1", PermissionStatus::Denied));
        // A second resolution is a no-op.
        assert!(!state.update_status("s1", "p1", PermissionStatus::Granted));
        assert!(!state.update_status("s1", "missing", PermissionStatus::Granted));
    }

    #[test]
    fn delete_pending_removes_record() {
        let state = PermissionState::new();
        state.set_pending(req("s1", "p1"));
        state.delete_pending("s1", "p1");
        assert!(state.all_pending("s1").is_empty());
    }

    #[test]
    fn allowlist_tool_only_matches_any_invocation() {
        let state = PermissionState::new();
        state.add_to_allowlist("s1", "bash", None, None);
        assert!(state.is_allowed("s1", "bash", Some("execute"), Some("/tmp")));
        assert!(state.is_allowed("s1", "bash", None, None));
        assert!(!state.is_allowed("s1", "write", None, None));
        assert!(!state.is_allowed("s2", "bash", None, None));
    }

    #[test]
    fn allowlist_action_scoped() {
        let state = PermissionState::new();
        state.add_to_allowlist("s1", "edit", Some("replace"), None);
        assert!(state.is_allowed("s1", "edit", Some("replace"), Some("/a")));
        assert!(!state.is_allowed("s1", "edit", Some("create"), None));
        assert!(!state.is_allowed("s1", "edit", None, None));
    }

    #[test]
    fn allowlist_exact_path_scoped() {
        let state = PermissionState::new();
        state.add_to_allowlist("s1", "write", Some("create"), Some("/src/main.rs"));
        assert!(state.is_allowed("s1", "write", Some("create"), Some("/src/main.rs")));
        assert!(!state.is_allowed("s1", "write", Some("create"), Some("/src/lib.rs")));
    }

    #[test]
    fn allowlist_deduplicates() {
        let state = PermissionState::new();
        state.add_to_allowlist("s1", "bash", None, None);
        state.add_to_allowlist("s1", "bash", None, None);
        // Still matches, and remove_session clears it entirely.
        assert!(state.is_allowed("s1", "bash", None, None));
        state.remove_session("s1");
        assert!(!state.is_allowed("s1", "bash", None, None));
    }

    #[test]
    fn pending_sorted_by_creation() {
        let state = PermissionState::new();
        let mut first = req("s1", "p1");
        first.created_at = Utc::now() - ChronoDuration::seconds(10);
        state.set_pending(first);
        state.set_pending(req("s1", "p2"));
        let pending = state.all_pending("s1");
        assert_eq!(pending[0].request.id, "p1");
        assert_eq!(pending[1].request.id, "p2");
    }
}
