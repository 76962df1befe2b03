//! Provider-agnostic streaming vocabulary.
//!
//! Every model adapter translates its wire format into [`DeltaEvent`]s.
//! Tool input fragments are assembled inside the adapter: by the time a
//! `ToolCall` delta is emitted its `input` is the complete JSON value.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

/// A boxed async stream, used for model streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted while streaming one model step.
///
/// Ordering contract: all deltas for step N arrive before any delta of
/// step N+1, and every step ends with exactly one `StepFinish`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeltaEvent {
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        text: String,
    },
    ReasoningEnd {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    TextDelta {
        id: String,
        text: String,
    },
    /// The model began emitting a tool call; input is still streaming.
    ToolInputStart {
        id: String,
        name: String,
    },
    /// Tool call with fully accumulated input.
    ToolCall {
        id: String,
        name: String,
        input: Value,
    },
    /// Result of a tool the provider executed itself.
    ToolResult {
        tool_call_id: String,
        name: String,
        content: String,
    },
    StepFinish {
        usage: Usage,
        reason: StepStopReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<Value>,
    },
    /// A transient provider failure; the adapter will retry after
    /// `delay_ms`.
    Retry {
        error: String,
        delay_ms: u64,
    },
}

/// Why the model stopped emitting for this step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Other,
}

/// Token usage for one step.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total.add(&Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            ..Default::default()
        });
        total.add(&Usage {
            prompt_tokens: 7,
            completion_tokens: 3,
            cache_read_tokens: 100,
            ..Default::default()
        });
        assert_eq!(total.prompt_tokens, 17);
        assert_eq!(total.completion_tokens, 8);
        assert_eq!(total.cache_read_tokens, 100);
        assert_eq!(total.total(), 25);
    }

    #[test]
    fn delta_serializes_tagged() {
        let d = DeltaEvent::TextDelta {
            id: "t1".into(),
            text: "hi".into(),
        };
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["type"], "text_delta");
        assert_eq!(v["text"], "hi");
    }

    #[test]
    fn step_stop_reason_wire_names() {
        assert_eq!(
            serde_json::to_value(StepStopReason::ToolUse).unwrap(),
            serde_json::json!("tool_use")
        );
    }
}
