//! Pre-scripted mock model for tests.
//!
//! Each call to `stream` pops the next script from the front of the
//! queue, so tests can specify exact delta sequences (including tool
//! calls and provider failures) without network access.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use co_domain::stream::{BoxStream, DeltaEvent, StepStopReason, Usage};
use co_domain::{Error, Result};

use crate::traits::{LanguageModel, ModelCall};

/// One scripted item: a delta or a mid-stream failure.
#[derive(Clone)]
pub enum ScriptItem {
    Delta(DeltaEvent),
    Fail { title: String, message: String },
}

pub struct MockModel {
    name: String,
    context_window: u64,
    scripts: Mutex<VecDeque<Vec<ScriptItem>>>,
    /// Every `ModelCall` seen, for assertions on history contents.
    pub calls: Arc<Mutex<Vec<ModelCall>>>,
}

impl MockModel {
    pub fn new(scripts: Vec<Vec<ScriptItem>>) -> Self {
        Self {
            name: "mock-model".into(),
            context_window: 200_000,
            scripts: Mutex::new(scripts.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_context_window(mut self, window: u64) -> Self {
        self.context_window = window;
        self
    }

    /// Script step: stream `text` as two deltas and finish the turn.
    pub fn text_step(text: &str) -> Vec<ScriptItem> {
        let mut split = text.len() / 2;
        while !text.is_char_boundary(split) {
            split -= 1;
        }
        let (a, b) = text.split_at(split);
        let mut items = Vec::new();
        if !a.is_empty() {
            items.push(ScriptItem::Delta(DeltaEvent::TextDelta {
                id: "text_0".into(),
                text: a.to_string(),
            }));
        }
        if !b.is_empty() {
            items.push(ScriptItem::Delta(DeltaEvent::TextDelta {
                id: "text_0".into(),
                text: b.to_string(),
            }));
        }
        items.push(ScriptItem::Delta(DeltaEvent::StepFinish {
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                ..Default::default()
            },
            reason: StepStopReason::EndTurn,
            provider_metadata: None,
        }));
        items
    }

    /// Script step: one tool call.
    pub fn tool_step(call_id: &str, tool: &str, input: serde_json::Value) -> Vec<ScriptItem> {
        vec![
            ScriptItem::Delta(DeltaEvent::ToolInputStart {
                id: call_id.into(),
                name: tool.into(),
            }),
            ScriptItem::Delta(DeltaEvent::ToolCall {
                id: call_id.into(),
                name: tool.into(),
                input,
            }),
            ScriptItem::Delta(DeltaEvent::StepFinish {
                usage: Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    ..Default::default()
                },
                reason: StepStopReason::ToolUse,
                provider_metadata: None,
            }),
        ]
    }

    /// Script step: reasoning, then text.
    pub fn reasoning_step(thought: &str, text: &str) -> Vec<ScriptItem> {
        let mut items = vec![
            ScriptItem::Delta(DeltaEvent::ReasoningStart {
                id: "r_0".into(),
            }),
            ScriptItem::Delta(DeltaEvent::ReasoningDelta {
                id: "r_0".into(),
                text: thought.to_string(),
            }),
            ScriptItem::Delta(DeltaEvent::ReasoningEnd {
                id: "r_0".into(),
                signature: Some("mock-signature".into()),
                metadata: None,
            }),
        ];
        items.extend(Self::text_step(text));
        items
    }

    /// Script step: fail mid-stream after some text.
    pub fn failing_step(text: &str, title: &str, message: &str) -> Vec<ScriptItem> {
        vec![
            ScriptItem::Delta(DeltaEvent::TextDelta {
                id: "text_0".into(),
                text: text.to_string(),
            }),
            ScriptItem::Fail {
                title: title.into(),
                message: message.into(),
            },
        ]
    }
}

#[async_trait::async_trait]
impl LanguageModel for MockModel {
    async fn stream(&self, call: ModelCall) -> Result<BoxStream<'static, Result<DeltaEvent>>> {
        self.calls.lock().push(call);
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| Self::text_step("OK"));

        let items: Vec<Result<DeltaEvent>> = script
            .into_iter()
            .map(|item| match item {
                ScriptItem::Delta(d) => Ok(d),
                ScriptItem::Fail { title, message } => Err(Error::Provider { title, message }),
            })
            .collect();
        Ok(Box::pin(futures_util::stream::iter(items)))
    }

    fn id(&self) -> &str {
        &self.name
    }

    fn provider(&self) -> &str {
        "mock"
    }

    fn context_window(&self) -> u64 {
        self.context_window
    }

    fn cost(&self, usage: &Usage) -> f64 {
        usage.total() as f64 / 1e6
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn scripts_pop_in_order() {
        let mock = MockModel::new(vec![
            MockModel::text_step("first"),
            MockModel::text_step("second"),
        ]);

        for expected in ["first", "second"] {
            let mut stream = mock.stream(ModelCall::default()).await.unwrap();
            let mut text = String::new();
            while let Some(event) = stream.next().await {
                if let DeltaEvent::TextDelta { text: t, .. } = event.unwrap() {
                    text.push_str(&t);
                }
            }
            assert_eq!(text, expected);
        }
        assert_eq!(mock.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn failing_step_yields_error() {
        let mock = MockModel::new(vec![MockModel::failing_step("part", "overloaded", "busy")]);
        let mut stream = mock.stream(ModelCall::default()).await.unwrap();

        let first = stream.next().await.unwrap();
        assert!(first.is_ok());
        let second = stream.next().await.unwrap();
        assert!(matches!(second, Err(Error::Provider { .. })));
    }
}
