//! The conversation model: sessions, messages, content parts, and
//! tool-call records.
//!
//! A `Message` is an ordered list of [`MessagePart`]s. The assistant
//! message being streamed is mutated in memory by the session agent and
//! snapshotted to the store only at step boundaries; everything here is
//! plain data with serde round-tripping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Identity and running counters of one conversation.
///
/// Counters are monotonic within a run and updated atomically with
/// message persistence at step boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project_id: String,
    pub title: String,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub summary_message_id: Option<String>,
    /// Provider/model of the most recent run, for display.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(project_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            title: title.into(),
            message_count: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost: 0.0,
            summary_message_id: None,
            provider: None,
            model: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message parts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// Why an assistant turn stopped. Every abnormal ending still produces
/// exactly one `Finish` part carrying one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Canceled,
    PermissionDenied,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
        /// Provider signature needed to resubmit thinking blocks on the
        /// next turn.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<Value>,
    },
    Binary {
        path: String,
        mime_type: String,
        #[serde(with = "b64")]
        data: Vec<u8>,
    },
    ToolCall {
        id: String,
        name: String,
        input: Value,
        finished: bool,
        #[serde(default)]
        provider_executed: bool,
    },
    ToolResult {
        tool_call_id: String,
        name: String,
        content: String,
        #[serde(default)]
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    Finish {
        reason: FinishReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

/// Base64 codec for binary part data.
mod b64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub is_summary: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn new(session_id: impl Into<String>, role: Role) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            role,
            parts: Vec::new(),
            model: None,
            provider: None,
            is_summary: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn user(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        let mut msg = Self::new(session_id, Role::User);
        msg.parts.push(MessagePart::Text { text: text.into() });
        msg
    }

    /// Append streamed text, coalescing into the trailing `Text` part.
    pub fn append_text(&mut self, delta: &str) {
        self.updated_at = Utc::now();
        if let Some(MessagePart::Text { text }) = self.parts.last_mut() {
            text.push_str(delta);
            return;
        }
        self.parts.push(MessagePart::Text {
            text: delta.to_string(),
        });
    }

    /// Append streamed reasoning, coalescing into the trailing
    /// `Reasoning` part.
    pub fn append_reasoning(&mut self, delta: &str) {
        self.updated_at = Utc::now();
        if let Some(MessagePart::Reasoning { text, .. }) = self.parts.last_mut() {
            text.push_str(delta);
            return;
        }
        self.parts.push(MessagePart::Reasoning {
            text: delta.to_string(),
            signature: None,
            provider_metadata: None,
        });
    }

    /// Attach the provider signature/metadata to the trailing reasoning
    /// part (captured on `reasoning_end`).
    pub fn finish_reasoning(&mut self, sig: Option<String>, metadata: Option<Value>) {
        if let Some(MessagePart::Reasoning {
            signature,
            provider_metadata,
            ..
        }) = self
            .parts
            .iter_mut()
            .rev()
            .find(|p| matches!(p, MessagePart::Reasoning { .. }))
        {
            *signature = sig;
            *provider_metadata = metadata;
        }
    }

    /// Register a tool call whose input is still streaming.
    pub fn add_tool_call(&mut self, id: impl Into<String>, name: impl Into<String>) {
        self.updated_at = Utc::now();
        self.parts.push(MessagePart::ToolCall {
            id: id.into(),
            name: name.into(),
            input: Value::Null,
            finished: false,
            provider_executed: false,
        });
    }

    /// Mark a tool call finished with its accumulated input. Returns
    /// false if the id is unknown.
    pub fn finish_tool_call(&mut self, call_id: &str, final_input: Value) -> bool {
        self.updated_at = Utc::now();
        for part in self.parts.iter_mut() {
            if let MessagePart::ToolCall {
                id,
                input,
                finished,
                ..
            } = part
            {
                if id == call_id {
                    *input = final_input;
                    *finished = true;
                    return true;
                }
            }
        }
        false
    }

    /// Finish any tool call still streaming input (used when the stream
    /// dies mid-call). Returns the ids that were closed.
    pub fn finish_dangling_tool_calls(&mut self) -> Vec<String> {
        let mut closed = Vec::new();
        for part in self.parts.iter_mut() {
            if let MessagePart::ToolCall {
                id,
                input,
                finished,
                ..
            } = part
            {
                if !*finished {
                    *input = Value::Object(Default::default());
                    *finished = true;
                    closed.push(id.clone());
                }
            }
        }
        closed
    }

    /// Flag a tool call as executed by the provider itself.
    pub fn mark_provider_executed(&mut self, call_id: &str) {
        for part in self.parts.iter_mut() {
            if let MessagePart::ToolCall {
                id,
                provider_executed,
                ..
            } = part
            {
                if id == call_id {
                    *provider_executed = true;
                }
            }
        }
    }

    pub fn push_finish(
        &mut self,
        reason: FinishReason,
        title: Option<String>,
        details: Option<String>,
    ) {
        self.updated_at = Utc::now();
        self.parts.push(MessagePart::Finish {
            reason,
            title,
            details,
        });
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.parts.iter().rev().find_map(|p| match p {
            MessagePart::Finish { reason, .. } => Some(*reason),
            _ => None,
        })
    }

    /// All tool-call parts, in insertion order.
    pub fn tool_calls(&self) -> Vec<(&str, &str, &Value, bool)> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::ToolCall {
                    id,
                    name,
                    input,
                    finished,
                    ..
                } => Some((id.as_str(), name.as_str(), input, *finished)),
                _ => None,
            })
            .collect()
    }

    /// Concatenated visible text (reasoning excluded).
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-call records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    AwaitingPermission,
    Running,
    Completed,
    Error,
    Cancelled,
    Timeout,
}

impl ToolCallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Error | Self::Cancelled | Self::Timeout
        )
    }

    /// Status transitions only move forward: `pending →
    /// [awaiting_permission →] running → terminal`.
    pub fn can_transition_to(self, next: ToolCallStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match self {
            Self::Pending => true,
            Self::AwaitingPermission => next != Self::Pending,
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }
}

/// Independently queryable tool-call state; the part of record for one
/// tool invocation. `id` equals the part id inside the owning message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub session_id: String,
    pub message_id: String,
    pub name: String,
    pub input: Value,
    pub status: ToolCallStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ToolCallRecord {
    pub fn new(
        id: impl Into<String>,
        session_id: impl Into<String>,
        message_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            session_id: session_id.into(),
            message_id: message_id.into(),
            name: name.into(),
            input: Value::Null,
            status: ToolCallStatus::Pending,
            result: None,
            is_error: false,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_text_coalesces() {
        let mut msg = Message::new("s1", Role::Assistant);
        msg.append_text("Hel");
        msg.append_text("lo");
        assert_eq!(msg.parts.len(), 1);
        assert_eq!(msg.text(), "Hello");
    }

    #[test]
    fn reasoning_precedes_text_in_new_parts() {
        let mut msg = Message::new("s1", Role::Assistant);
        msg.append_reasoning("thinking");
        msg.append_text("answer");
        msg.append_reasoning("more"); // new reasoning part after text
        assert_eq!(msg.parts.len(), 3);
        assert!(matches!(msg.parts[0], MessagePart::Reasoning { .. }));
        assert!(matches!(msg.parts[1], MessagePart::Text { .. }));
    }

    #[test]
    fn finish_reasoning_targets_last_reasoning_part() {
        let mut msg = Message::new("s1", Role::Assistant);
        msg.append_reasoning("a");
        msg.append_text("t");
        msg.append_reasoning("b");
        msg.finish_reasoning(Some("sig".into()), None);
        match &msg.parts[2] {
            MessagePart::Reasoning { signature, .. } => {
                assert_eq!(signature.as_deref(), Some("sig"));
            }
            _ => panic!("expected Reasoning part"),
        }
        match &msg.parts[0] {
            MessagePart::Reasoning { signature, .. } => assert!(signature.is_none()),
            _ => panic!("expected Reasoning part"),
        }
    }

    #[test]
    fn tool_call_lifecycle_in_parts() {
        let mut msg = Message::new("s1", Role::Assistant);
        msg.add_tool_call("tc1", "ls");
        assert!(msg.finish_tool_call("tc1", serde_json::json!({"path": "."})));
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "tc1");
        assert!(calls[0].3);
        assert!(!msg.finish_tool_call("missing", Value::Null));
    }

    #[test]
    fn dangling_tool_calls_are_closed_with_empty_input() {
        let mut msg = Message::new("s1", Role::Assistant);
        msg.add_tool_call("tc1", "ls");
        msg.add_tool_call("tc2", "bash");
        msg.finish_tool_call("tc1", serde_json::json!({}));
        let closed = msg.finish_dangling_tool_calls();
        assert_eq!(closed, vec!["tc2".to_string()]);
        assert!(msg.tool_calls().iter().all(|(_, _, _, fin)| *fin));
    }

    #[test]
    fn finish_reason_returns_last() {
        let mut msg = Message::new("s1", Role::Assistant);
        assert!(msg.finish_reason().is_none());
        msg.push_finish(FinishReason::EndTurn, None, None);
        assert_eq!(msg.finish_reason(), Some(FinishReason::EndTurn));
    }

    #[test]
    fn parts_roundtrip_through_json() {
        let mut msg = Message::new("s1", Role::Assistant);
        msg.append_reasoning("hm");
        msg.finish_reasoning(Some("sig".into()), Some(serde_json::json!({"k": 1})));
        msg.append_text("ok");
        msg.add_tool_call("tc1", "view");
        msg.finish_tool_call("tc1", serde_json::json!({"path": "a.txt"}));
        msg.parts.push(MessagePart::Binary {
            path: "img.png".into(),
            mime_type: "image/png".into(),
            data: vec![1, 2, 3, 255],
        });
        msg.push_finish(FinishReason::ToolUse, None, None);

        let json = serde_json::to_string(&msg.parts).unwrap();
        let back: Vec<MessagePart> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg.parts);
    }

    #[test]
    fn binary_data_is_base64_on_the_wire() {
        let part = MessagePart::Binary {
            path: "x".into(),
            mime_type: "application/octet-stream".into(),
            data: vec![0, 1, 2],
        };
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["data"], serde_json::json!("AAEC"));
    }

    #[test]
    fn tool_call_status_forward_only() {
        use ToolCallStatus::*;
        assert!(Pending.can_transition_to(AwaitingPermission));
        assert!(Pending.can_transition_to(Running));
        assert!(AwaitingPermission.can_transition_to(Running));
        assert!(!AwaitingPermission.can_transition_to(Pending));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Timeout));
        assert!(!Running.can_transition_to(AwaitingPermission));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Completed));
    }

    #[test]
    fn session_new_defaults() {
        let s = Session::new("p1", "untitled");
        assert_eq!(s.message_count, 0);
        assert_eq!(s.prompt_tokens, 0);
        assert!(s.summary_message_id.is_none());
    }
}
