//! Anthropic Messages API adapter.
//!
//! Translates the Messages streaming protocol (content blocks with
//! thinking, text, and tool-use deltas) into the shared delta
//! vocabulary. Thinking signatures are captured on `reasoning_end` so
//! the agent can resubmit thinking blocks on the next turn.

use std::collections::HashMap;

use base64::Engine;
use futures_util::StreamExt;
use serde_json::{json, Value};

use co_domain::message::{Message, MessagePart, Role};
use co_domain::stream::{BoxStream, DeltaEvent, Usage};
use co_domain::{Error, Result};

use crate::retry::{backoff_delay_ms, is_retryable_status, max_attempts};
use crate::sse::sse_response_stream;
use crate::traits::{LanguageModel, ModelCall};
use crate::util::{from_reqwest, map_stop_reason};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AnthropicModel {
    model: String,
    base_url: String,
    api_key: String,
    context_window: u64,
    /// USD per million (input, output) tokens.
    pricing: (f64, f64),
    client: reqwest::Client,
}

impl AnthropicModel {
    pub fn new(
        model: impl Into<String>,
        api_key: impl Into<String>,
        base_url: Option<String>,
        context_window: u64,
        pricing: (f64, f64),
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            model: model.into(),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.into())
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.into(),
            context_window,
            pricing,
            client,
        })
    }

    fn build_body(&self, call: &ModelCall) -> Value {
        let mut api_messages: Vec<Value> = Vec::new();
        for msg in &call.messages {
            match msg.role {
                Role::User => api_messages.push(user_msg_to_anthropic(msg)),
                Role::Assistant => api_messages.push(assistant_msg_to_anthropic(msg)),
                // Tool results go back as user messages with
                // tool_result content blocks.
                Role::Tool => api_messages.push(tool_result_to_anthropic(msg)),
            }
        }

        if call.cache_control {
            let len = api_messages.len();
            for msg in api_messages.iter_mut().skip(len.saturating_sub(2)) {
                mark_last_block_cached(msg);
            }
        }

        let mut system_block = json!({"type": "text", "text": call.system});
        if call.cache_control {
            system_block["cache_control"] = json!({"type": "ephemeral"});
        }

        let mut body = json!({
            "model": self.model,
            "messages": api_messages,
            "system": [system_block],
            "stream": true,
            "max_tokens": call.max_output_tokens.unwrap_or(8_192),
        });

        if !call.tools.is_empty() {
            body["tools"] = Value::Array(
                call.tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.parameters,
                        })
                    })
                    .collect(),
            );
        }
        if let Some(temp) = call.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(top_p) = call.top_p {
            body["top_p"] = json!(top_p);
        }
        if call.think {
            let budget = match call.reasoning_effort.as_deref() {
                Some("low") => 2_048,
                Some("high") => 16_384,
                _ => 8_192,
            };
            body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
            // Thinking rejects explicit temperature.
            if let Some(obj) = body.as_object_mut() {
                obj.remove("temperature");
            }
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn user_msg_to_anthropic(msg: &Message) -> Value {
    let content: Vec<Value> = msg
        .parts
        .iter()
        .filter_map(|p| match p {
            MessagePart::Text { text } => Some(json!({"type": "text", "text": text})),
            MessagePart::Binary {
                mime_type, data, ..
            } => Some(json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": mime_type,
                    "data": base64::engine::general_purpose::STANDARD.encode(data),
                }
            })),
            _ => None,
        })
        .collect();
    json!({"role": "user", "content": content})
}

fn assistant_msg_to_anthropic(msg: &Message) -> Value {
    let content: Vec<Value> = msg
        .parts
        .iter()
        .filter_map(|p| match p {
            // Thinking blocks are only resubmittable with their
            // signature.
            MessagePart::Reasoning {
                text,
                signature: Some(sig),
                ..
            } => Some(json!({
                "type": "thinking",
                "thinking": text,
                "signature": sig,
            })),
            MessagePart::Text { text } if !text.is_empty() => {
                Some(json!({"type": "text", "text": text}))
            }
            MessagePart::ToolCall {
                id,
                name,
                input,
                finished: true,
                provider_executed: false,
            } => Some(json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": input,
            })),
            _ => None,
        })
        .collect();
    json!({"role": "assistant", "content": content})
}

fn tool_result_to_anthropic(msg: &Message) -> Value {
    let content: Vec<Value> = msg
        .parts
        .iter()
        .filter_map(|p| match p {
            MessagePart::ToolResult {
                tool_call_id,
                content,
                is_error,
                ..
            } => Some(json!({
                "type": "tool_result",
                "tool_use_id": tool_call_id,
                "content": content,
                "is_error": is_error,
            })),
            _ => None,
        })
        .collect();
    json!({"role": "user", "content": content})
}

fn mark_last_block_cached(msg: &mut Value) {
    if let Some(blocks) = msg.get_mut("content").and_then(|c| c.as_array_mut()) {
        if let Some(last) = blocks.last_mut() {
            last["cache_control"] = json!({"type": "ephemeral"});
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming state machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum BlockKind {
    Thinking { signature: Option<String> },
    Text,
    ToolUse { call_id: String, name: String, buf: String },
}

/// Per-attempt state for assembling content blocks.
struct StreamState {
    blocks: HashMap<u64, BlockKind>,
    usage: Usage,
    finished: bool,
}

impl StreamState {
    fn new() -> Self {
        Self {
            blocks: HashMap::new(),
            usage: Usage::default(),
            finished: false,
        }
    }
}

fn block_id(idx: u64) -> String {
    format!("block_{idx}")
}

/// Parse one SSE data payload into zero or more deltas.
fn parse_sse(data: &str, state: &mut StreamState) -> Vec<Result<DeltaEvent>> {
    let mut events = Vec::new();
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            events.push(Err(Error::Json(e)));
            return events;
        }
    };

    match v.get("type").and_then(|t| t.as_str()).unwrap_or("") {
        "message_start" => {
            if let Some(u) = v.get("message").and_then(|m| m.get("usage")) {
                state.usage = parse_usage(u);
            }
        }

        "content_block_start" => {
            let idx = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
            let Some(block) = v.get("content_block") else {
                return events;
            };
            match block.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                "thinking" | "redacted_thinking" => {
                    state.blocks.insert(idx, BlockKind::Thinking { signature: None });
                    events.push(Ok(DeltaEvent::ReasoningStart { id: block_id(idx) }));
                }
                "text" => {
                    state.blocks.insert(idx, BlockKind::Text);
                }
                "tool_use" => {
                    let call_id = block
                        .get("id")
                        .and_then(|i| i.as_str())
                        .unwrap_or("")
                        .to_string();
                    let name = block
                        .get("name")
                        .and_then(|n| n.as_str())
                        .unwrap_or("")
                        .to_string();
                    events.push(Ok(DeltaEvent::ToolInputStart {
                        id: call_id.clone(),
                        name: name.clone(),
                    }));
                    state.blocks.insert(
                        idx,
                        BlockKind::ToolUse {
                            call_id,
                            name,
                            buf: String::new(),
                        },
                    );
                }
                _ => {}
            }
        }

        "content_block_delta" => {
            let idx = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
            let Some(delta) = v.get("delta") else {
                return events;
            };
            match delta.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                "text_delta" => {
                    if let Some(text) = delta.get("text").and_then(|t| t.as_str()) {
                        if !text.is_empty() {
                            events.push(Ok(DeltaEvent::TextDelta {
                                id: block_id(idx),
                                text: text.to_string(),
                            }));
                        }
                    }
                }
                "thinking_delta" => {
                    if let Some(text) = delta.get("thinking").and_then(|t| t.as_str()) {
                        if !text.is_empty() {
                            events.push(Ok(DeltaEvent::ReasoningDelta {
                                id: block_id(idx),
                                text: text.to_string(),
                            }));
                        }
                    }
                }
                "signature_delta" => {
                    if let (Some(sig), Some(BlockKind::Thinking { signature })) = (
                        delta.get("signature").and_then(|s| s.as_str()),
                        state.blocks.get_mut(&idx),
                    ) {
                        *signature = Some(sig.to_string());
                    }
                }
                "input_json_delta" => {
                    if let (Some(partial), Some(BlockKind::ToolUse { buf, .. })) = (
                        delta.get("partial_json").and_then(|p| p.as_str()),
                        state.blocks.get_mut(&idx),
                    ) {
                        buf.push_str(partial);
                    }
                }
                _ => {}
            }
        }

        "content_block_stop" => {
            let idx = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
            match state.blocks.remove(&idx) {
                Some(BlockKind::Thinking { signature }) => {
                    events.push(Ok(DeltaEvent::ReasoningEnd {
                        id: block_id(idx),
                        signature,
                        metadata: None,
                    }));
                }
                Some(BlockKind::ToolUse { call_id, name, buf }) => {
                    let input = if buf.trim().is_empty() {
                        Value::Object(Default::default())
                    } else {
                        serde_json::from_str(&buf).unwrap_or_else(|e| {
                            tracing::warn!(
                                call_id = %call_id,
                                error = %e,
                                "tool input is not valid JSON, defaulting to empty object"
                            );
                            Value::Object(Default::default())
                        })
                    };
                    events.push(Ok(DeltaEvent::ToolCall {
                        id: call_id,
                        name,
                        input,
                    }));
                }
                _ => {}
            }
        }

        "message_delta" => {
            if let Some(u) = v.get("usage") {
                if let Some(out) = u.get("output_tokens").and_then(|t| t.as_u64()) {
                    state.usage.completion_tokens = out;
                }
            }
            if let Some(stop) = v
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(|s| s.as_str())
            {
                state.finished = true;
                events.push(Ok(DeltaEvent::StepFinish {
                    usage: state.usage,
                    reason: map_stop_reason(stop),
                    provider_metadata: None,
                }));
            }
        }

        "message_stop" => {
            if !state.finished {
                state.finished = true;
                events.push(Ok(DeltaEvent::StepFinish {
                    usage: state.usage,
                    reason: co_domain::stream::StepStopReason::EndTurn,
                    provider_metadata: None,
                }));
            }
        }

        "error" => {
            let err = v.get("error");
            let title = err
                .and_then(|e| e.get("type"))
                .and_then(|t| t.as_str())
                .unwrap_or("api_error")
                .to_string();
            let message = err
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("unknown provider error")
                .to_string();
            events.push(Err(Error::Provider { title, message }));
        }

        // ping and unknown event types
        _ => {}
    }

    events
}

fn parse_usage(v: &Value) -> Usage {
    Usage {
        prompt_tokens: v.get("input_tokens").and_then(|t| t.as_u64()).unwrap_or(0),
        completion_tokens: v.get("output_tokens").and_then(|t| t.as_u64()).unwrap_or(0),
        cache_read_tokens: v
            .get("cache_read_input_tokens")
            .and_then(|t| t.as_u64())
            .unwrap_or(0),
        cache_write_tokens: v
            .get("cache_creation_input_tokens")
            .and_then(|t| t.as_u64())
            .unwrap_or(0),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LanguageModel for AnthropicModel {
    async fn stream(&self, call: ModelCall) -> Result<BoxStream<'static, Result<DeltaEvent>>> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(&call);
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let model = self.model.clone();

        tracing::debug!(model = %model, "anthropic stream request");

        let stream = async_stream::stream! {
            let mut attempt: u32 = 0;
            'attempts: loop {
                let result = client
                    .post(&url)
                    .header("x-api-key", &api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .header("Content-Type", "application/json")
                    .json(&body)
                    .send()
                    .await;

                match result {
                    Ok(resp) if resp.status().is_success() => {
                        let mut state = StreamState::new();
                        let mut inner =
                            sse_response_stream(resp, move |data| parse_sse(data, &mut state));
                        while let Some(event) = inner.next().await {
                            yield event;
                        }
                        break 'attempts;
                    }
                    Ok(resp) => {
                        let status = resp.status();
                        let text = resp.text().await.unwrap_or_default();
                        if is_retryable_status(status) && attempt + 1 < max_attempts() {
                            let delay = backoff_delay_ms(attempt);
                            yield Ok(DeltaEvent::Retry {
                                error: format!("HTTP {}", status.as_u16()),
                                delay_ms: delay,
                            });
                            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                            attempt += 1;
                            continue 'attempts;
                        }
                        yield Err(Error::Provider {
                            title: format!("HTTP {}", status.as_u16()),
                            message: text,
                        });
                        break 'attempts;
                    }
                    Err(e) => {
                        if attempt + 1 < max_attempts() {
                            let delay = backoff_delay_ms(attempt);
                            yield Ok(DeltaEvent::Retry {
                                error: e.to_string(),
                                delay_ms: delay,
                            });
                            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                            attempt += 1;
                            continue 'attempts;
                        }
                        yield Err(from_reqwest(e));
                        break 'attempts;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn id(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &str {
        "anthropic"
    }

    fn context_window(&self) -> u64 {
        self.context_window
    }

    fn cost(&self, usage: &Usage) -> f64 {
        let (input, output) = self.pricing;
        (usage.prompt_tokens as f64 * input + usage.completion_tokens as f64 * output) / 1e6
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
