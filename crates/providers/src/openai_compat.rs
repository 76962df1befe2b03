//! OpenAI-compatible Chat Completions adapter.
//!
//! Covers OpenAI itself plus the long tail of API-compatible gateways.
//! `reasoning_content` deltas (DeepSeek-style) map onto the reasoning
//! vocabulary; tool-call argument fragments are assembled by index and
//! emitted as complete `ToolCall` deltas when the step's finish reason
//! arrives.

use std::collections::BTreeMap;

use base64::Engine;
use futures_util::StreamExt;
use serde_json::{json, Value};

use co_domain::message::{Message, MessagePart, Role};
use co_domain::stream::{BoxStream, DeltaEvent, StepStopReason, Usage};
use co_domain::{Error, Result};

use crate::retry::{backoff_delay_ms, is_retryable_status, max_attempts};
use crate::sse::sse_response_stream;
use crate::traits::{LanguageModel, ModelCall};
use crate::util::{from_reqwest, map_stop_reason};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatModel {
    model: String,
    base_url: String,
    api_key: String,
    context_window: u64,
    /// USD per million (input, output) tokens.
    pricing: (f64, f64),
    client: reqwest::Client,
}

impl OpenAiCompatModel {
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
        let mut api_messages = vec![json!({"role": "system", "content": call.system})];
        for msg in &call.messages {
            messages_to_openai(msg, &mut api_messages);
        }

        let mut body = json!({
            "model": self.model,
            "messages": api_messages,
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if !call.tools.is_empty() {
            body["tools"] = Value::Array(
                call.tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect(),
            );
        }
        if let Some(max) = call.max_output_tokens {
            body["max_completion_tokens"] = json!(max);
        }
        if let Some(temp) = call.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(top_p) = call.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(effort) = &call.reasoning_effort {
            body["reasoning_effort"] = json!(effort);
        }
        body
    }
}

fn messages_to_openai(msg: &Message, out: &mut Vec<Value>) {
    match msg.role {
        Role::User => {
            let has_binary = msg
                .parts
                .iter()
                .any(|p| matches!(p, MessagePart::Binary { .. }));
            if !has_binary {
                out.push(json!({"role": "user", "content": msg.text()}));
                return;
            }
            let content: Vec<Value> = msg
                .parts
                .iter()
                .filter_map(|p| match p {
                    MessagePart::Text { text } => {
                        Some(json!({"type": "text", "text": text}))
                    }
                    MessagePart::Binary {
                        mime_type, data, ..
                    } => Some(json!({
                        "type": "image_url",
                        "image_url": {"url": format!(
                            "data:{mime_type};base64,{}",
                            base64::engine::general_purpose::STANDARD.encode(data)
                        )}
                    })),
                    _ => None,
                })
                .collect();
            out.push(json!({"role": "user", "content": content}));
        }
        Role::Assistant => {
            let text = msg.text();
            let tool_calls: Vec<Value> = msg
                .parts
                .iter()
                .filter_map(|p| match p {
                    MessagePart::ToolCall {
                        id,
                        name,
                        input,
                        finished: true,
                        provider_executed: false,
                    } => Some(json!({
                        "id": id,
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": input.to_string(),
                        }
                    })),
                    _ => None,
                })
                .collect();
            let mut entry = json!({"role": "assistant"});
            entry["content"] = if text.is_empty() {
                Value::Null
            } else {
                Value::String(text)
            };
            if !tool_calls.is_empty() {
                entry["tool_calls"] = Value::Array(tool_calls);
            }
            out.push(entry);
        }
        Role::Tool => {
            for part in &msg.parts {
                if let MessagePart::ToolResult {
                    tool_call_id,
                    content,
                    ..
                } = part
                {
                    out.push(json!({
                        "role": "tool",
                        "tool_call_id": tool_call_id,
                        "content": content,
                    }));
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming state machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ToolBuf {
    id: String,
    name: String,
    args: String,
    announced: bool,
}

struct StreamState {
    /// Tool calls assembled by stream index.
    tools: BTreeMap<u64, ToolBuf>,
    reasoning_open: bool,
    usage: Usage,
    stop_reason: Option<StepStopReason>,
    finished: bool,
}

impl StreamState {
    fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            reasoning_open: false,
            usage: Usage::default(),
            stop_reason: None,
            finished: false,
        }
    }

    /// Emit assembled tool calls in index order.
    fn flush_tools(&mut self, events: &mut Vec<Result<DeltaEvent>>) {
        for (_, tool) in std::mem::take(&mut self.tools) {
            let input = if tool.args.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&tool.args).unwrap_or_else(|e| {
                    tracing::warn!(
                        call_id = %tool.id,
                        error = %e,
                        "tool arguments are not valid JSON, defaulting to empty object"
                    );
                    Value::Object(Default::default())
                })
            };
            events.push(Ok(DeltaEvent::ToolCall {
                id: tool.id,
                name: tool.name,
                input,
            }));
        }
    }

    fn close_reasoning(&mut self, events: &mut Vec<Result<DeltaEvent>>) {
        if self.reasoning_open {
            self.reasoning_open = false;
            events.push(Ok(DeltaEvent::ReasoningEnd {
                id: "reasoning_0".into(),
                signature: None,
                metadata: None,
            }));
        }
    }
}

fn parse_sse(data: &str, state: &mut StreamState) -> Vec<Result<DeltaEvent>> {
    let mut events = Vec::new();

    if data == "[DONE]" {
        state.close_reasoning(&mut events);
        state.flush_tools(&mut events);
        if !state.finished {
            state.finished = true;
            events.push(Ok(DeltaEvent::StepFinish {
                usage: state.usage,
                reason: state.stop_reason.unwrap_or(StepStopReason::EndTurn),
                provider_metadata: None,
            }));
        }
        return events;
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            events.push(Err(Error::Json(e)));
            return events;
        }
    };

    if let Some(err) = v.get("error") {
        let title = err
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("api_error")
            .to_string();
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown provider error")
            .to_string();
        events.push(Err(Error::Provider { title, message }));
        return events;
    }

    // The usage-only chunk has an empty choices array.
    if let Some(u) = v.get("usage").filter(|u| !u.is_null()) {
        state.usage = Usage {
            prompt_tokens: u.get("prompt_tokens").and_then(|t| t.as_u64()).unwrap_or(0),
            completion_tokens: u
                .get("completion_tokens")
                .and_then(|t| t.as_u64())
                .unwrap_or(0),
            ..Default::default()
        };
    }

    let Some(choice) = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
    else {
        return events;
    };

    if let Some(delta) = choice.get("delta") {
        if let Some(reasoning) = delta
            .get("reasoning_content")
            .and_then(|r| r.as_str())
            .filter(|r| !r.is_empty())
        {
            if !state.reasoning_open {
                state.reasoning_open = true;
                events.push(Ok(DeltaEvent::ReasoningStart {
                    id: "reasoning_0".into(),
                }));
            }
            events.push(Ok(DeltaEvent::ReasoningDelta {
                id: "reasoning_0".into(),
                text: reasoning.to_string(),
            }));
        }
        if let Some(text) = delta
            .get("content")
            .and_then(|c| c.as_str())
            .filter(|c| !c.is_empty())
        {
            state.close_reasoning(&mut events);
            events.push(Ok(DeltaEvent::TextDelta {
                id: "text_0".into(),
                text: text.to_string(),
            }));
        }
        if let Some(calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
            state.close_reasoning(&mut events);
            for call in calls {
                let idx = call.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                let buf = state.tools.entry(idx).or_insert_with(|| ToolBuf {
                    id: String::new(),
                    name: String::new(),
                    args: String::new(),
                    announced: false,
                });
                if let Some(id) = call.get("id").and_then(|i| i.as_str()) {
                    buf.id = id.to_string();
                }
                if let Some(function) = call.get("function") {
                    if let Some(name) = function.get("name").and_then(|n| n.as_str()) {
                        buf.name = name.to_string();
                    }
                    if let Some(args) = function.get("arguments").and_then(|a| a.as_str()) {
                        buf.args.push_str(args);
                    }
                }
                if !buf.announced && !buf.id.is_empty() && !buf.name.is_empty() {
                    buf.announced = true;
                    events.push(Ok(DeltaEvent::ToolInputStart {
                        id: buf.id.clone(),
                        name: buf.name.clone(),
                    }));
                }
            }
        }
    }

    if let Some(reason) = choice
        .get("finish_reason")
        .and_then(|r| r.as_str())
        .filter(|r| !r.is_empty())
    {
        state.close_reasoning(&mut events);
        state.flush_tools(&mut events);
        state.stop_reason = Some(map_stop_reason(reason));
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LanguageModel for OpenAiCompatModel {
    async fn stream(&self, call: ModelCall) -> Result<BoxStream<'static, Result<DeltaEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&call);
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let model = self.model.clone();

        tracing::debug!(model = %model, "openai-compatible stream request");

        let stream = async_stream::stream! {
            let mut attempt: u32 = 0;
            'attempts: loop {
                let result = client
                    .post(&url)
                    .bearer_auth(&api_key)
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
        "openai"
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

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(state: &mut StreamState, payloads: &[&str]) -> Vec<DeltaEvent> {
        payloads
            .iter()
            .flat_map(|p| parse_sse(p, state))
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn text_then_done() {
        let mut state = StreamState::new();
        let events = collect(
            &mut state,
            &[
                r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
                r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
                r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
                r#"{"choices":[],"usage":{"prompt_tokens":9,"completion_tokens":2}}"#,
                "[DONE]",
            ],
        );
        assert!(matches!(&events[0], DeltaEvent::TextDelta { text, .. } if text == "Hel"));
        match events.last().unwrap() {
            DeltaEvent::StepFinish { usage, reason, .. } => {
                assert_eq!(usage.prompt_tokens, 9);
                assert_eq!(usage.completion_tokens, 2);
                assert_eq!(*reason, StepStopReason::EndTurn);
            }
            other => panic!("expected StepFinish, got {other:?}"),
        }
    }

    #[test]
    fn tool_call_assembled_across_fragments() {
        let mut state = StreamState::new();
        let events = collect(
            &mut state,
            &[
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"grep","arguments":""}}]}}]}"#,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"pattern\""}}]}}]}"#,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":":\"x\"}"}}]}}]}"#,
                r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
                "[DONE]",
            ],
        );
        assert!(matches!(
            &events[0],
            DeltaEvent::ToolInputStart { id, name } if id == "call_1" && name == "grep"
        ));
        match &events[1] {
            DeltaEvent::ToolCall { id, name, input } => {
                assert_eq!(id, "call_1");
                assert_eq!(name, "grep");
                assert_eq!(input, &json!({"pattern": "x"}));
            }
            other => panic!("expected ToolCall, got {other:?}"),
        }
        assert!(matches!(
            events.last().unwrap(),
            DeltaEvent::StepFinish { reason: StepStopReason::ToolUse, .. }
        ));
    }

    #[test]
    fn reasoning_content_maps_to_reasoning_deltas() {
        let mut state = StreamState::new();
        let events = collect(
            &mut state,
            &[
                r#"{"choices":[{"delta":{"reasoning_content":"let me think"}}]}"#,
                r#"{"choices":[{"delta":{"content":"answer"}}]}"#,
                r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
                "[DONE]",
            ],
        );
        assert!(matches!(&events[0], DeltaEvent::ReasoningStart { .. }));
        assert!(
            matches!(&events[1], DeltaEvent::ReasoningDelta { text, .. } if text == "let me think")
        );
        // Reasoning closes before the first visible text.
        assert!(matches!(&events[2], DeltaEvent::ReasoningEnd { .. }));
        assert!(matches!(&events[3], DeltaEvent::TextDelta { text, .. } if text == "answer"));
    }

    #[test]
    fn error_chunk_surfaces_provider_error() {
        let mut state = StreamState::new();
        let results = parse_sse(
            r#"{"error":{"type":"insufficient_quota","message":"quota exceeded"}}"#,
            &mut state,
        );
        assert!(matches!(
            &results[0],
            Err(Error::Provider { title, .. }) if title == "insufficient_quota"
        ));
    }

    #[test]
    fn tool_results_expand_to_tool_role_messages() {
        let mut msg = Message::new("s1", Role::Tool);
        msg.parts.push(MessagePart::ToolResult {
            tool_call_id: "tc1".into(),
            name: "ls".into(),
            content: "a.txt".into(),
            is_error: false,
            metadata: None,
        });
        msg.parts.push(MessagePart::ToolResult {
            tool_call_id: "tc2".into(),
            name: "view".into(),
            content: "hello".into(),
            is_error: false,
            metadata: None,
        });
        let mut out = Vec::new();
        messages_to_openai(&msg, &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["role"], "tool");
        assert_eq!(out[0]["tool_call_id"], "tc1");
        assert_eq!(out[1]["tool_call_id"], "tc2");
    }

    #[test]
    fn assistant_with_tool_calls_serializes_arguments_as_string() {
        let mut msg = Message::new("s1", Role::Assistant);
        msg.add_tool_call("tc1", "bash");
        msg.finish_tool_call("tc1", json!({"command": "ls"}));
        let mut out = Vec::new();
        messages_to_openai(&msg, &mut out);
        assert_eq!(out[0]["tool_calls"][0]["function"]["name"], "bash");
        let args = out[0]["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(args).unwrap(),
            json!({"command": "ls"})
        );
    }
}
