//! Typed domain events carried by the in-process bus and projected onto
//! the durable event stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{Message, Session, ToolCallRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOp {
    Created,
    Updated,
    Deleted,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Permission payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An interactive permission request presented to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: String,
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub description: String,
    /// Tool-specific action, e.g. `"execute"` or `"write"`.
    pub action: String,
    pub params: Value,
    #[serde(default)]
    pub path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The resolution of a permission request. Exactly one notification is
/// published per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionNotification {
    pub id: String,
    pub session_id: String,
    pub tool_call_id: String,
    pub granted: bool,
    pub denied: bool,
    /// True when the broker resolved the request without asking the
    /// user (skip config, session auto-approve, or allowlist hit).
    #[serde(default)]
    pub auto: bool,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bus events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The event vocabulary of the in-process bus.
///
/// Events with a wire type (see [`BusEvent::stream_type`]) are appended
/// to the durable event stream and fanned out to live sockets; the rest
/// are internal.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusEvent {
    Message {
        op: EventOp,
        message: Message,
    },
    Session {
        op: EventOp,
        session: Session,
    },
    PermissionRequest {
        request: PermissionRequest,
    },
    PermissionNotification {
        notification: PermissionNotification,
    },
    ToolCall {
        op: EventOp,
        record: ToolCallRecord,
    },
    History {
        op: EventOp,
        session_id: String,
    },
    Mcp {
        op: EventOp,
        server: String,
        detail: String,
    },
    Lsp {
        op: EventOp,
        session_id: String,
        detail: String,
    },
    GenerationComplete {
        session_id: String,
        error: bool,
    },
}

impl BusEvent {
    /// The session this event belongs to, when it has one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            BusEvent::Message { message, .. } => Some(&message.session_id),
            BusEvent::Session { session, .. } => Some(&session.id),
            BusEvent::PermissionRequest { request } => Some(&request.session_id),
            BusEvent::PermissionNotification { notification } => Some(&notification.session_id),
            BusEvent::ToolCall { record, .. } => Some(&record.session_id),
            BusEvent::History { session_id, .. } => Some(session_id),
            BusEvent::Lsp { session_id, .. } => Some(session_id),
            BusEvent::GenerationComplete { session_id, .. } => Some(session_id),
            BusEvent::Mcp { .. } => None,
        }
    }

    /// Wire/stream type for events that reach clients; `None` for
    /// internal-only events.
    pub fn stream_type(&self) -> Option<&'static str> {
        match self {
            BusEvent::Message { .. } => Some("message"),
            BusEvent::Session { .. } => Some("session_update"),
            BusEvent::PermissionRequest { .. } => Some("permission_request"),
            BusEvent::PermissionNotification { .. } => Some("permission_notification"),
            BusEvent::ToolCall { .. } => Some("tool_call_update"),
            BusEvent::GenerationComplete { .. } => Some("generation_complete"),
            BusEvent::History { .. } | BusEvent::Mcp { .. } | BusEvent::Lsp { .. } => None,
        }
    }

    /// Payload as published to the durable stream (the event minus its
    /// envelope).
    pub fn stream_payload(&self) -> Value {
        match self {
            BusEvent::Message { message, .. } => serde_json::to_value(message),
            BusEvent::Session { session, .. } => serde_json::to_value(session),
            BusEvent::PermissionRequest { request } => serde_json::to_value(request),
            BusEvent::PermissionNotification { notification } => serde_json::to_value(notification),
            BusEvent::ToolCall { record, .. } => serde_json::to_value(record),
            BusEvent::GenerationComplete { session_id, error } => Ok(serde_json::json!({
                "session_id": session_id,
                "error": error,
            })),
            BusEvent::History { .. } | BusEvent::Mcp { .. } | BusEvent::Lsp { .. } => {
                Ok(Value::Null)
            }
        }
        .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn session_id_resolution() {
        let msg = Message::new("s42", Role::User);
        let ev = BusEvent::Message {
            op: EventOp::Created,
            message: msg,
        };
        assert_eq!(ev.session_id(), Some("s42"));

        let ev = BusEvent::Mcp {
            op: EventOp::Created,
            server: "fs".into(),
            detail: "connected".into(),
        };
        assert_eq!(ev.session_id(), None);
    }

    #[test]
    fn wire_types_match_stream_vocabulary() {
        let ev = BusEvent::GenerationComplete {
            session_id: "s1".into(),
            error: false,
        };
        assert_eq!(ev.stream_type(), Some("generation_complete"));

        let ev = BusEvent::History {
            op: EventOp::Updated,
            session_id: "s1".into(),
        };
        assert_eq!(ev.stream_type(), None);
    }

    #[test]
    fn generation_complete_payload() {
        let ev = BusEvent::GenerationComplete {
            session_id: "s1".into(),
            error: true,
        };
        let payload = ev.stream_payload();
        assert_eq!(payload["session_id"], "s1");
        assert_eq!(payload["error"], true);
    }
}
