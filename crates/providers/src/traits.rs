use co_domain::message::Message;
use co_domain::stream::{BoxStream, DeltaEvent};
use co_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Call types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tool definition exposed to the model.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's input.
    pub parameters: serde_json::Value,
}

/// One model step: system prompt, conversation history, and decoding
/// parameters.
#[derive(Debug, Clone, Default)]
pub struct ModelCall {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub max_output_tokens: Option<u64>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    /// Request extended thinking from providers that support it.
    pub think: bool,
    pub reasoning_effort: Option<String>,
    /// Apply provider cache markers to the system prompt and the tail
    /// of the history.
    pub cache_control: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core model trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every model adapter implements.
///
/// `stream` performs one step: the returned stream yields deltas in
/// provider order and ends with exactly one `StepFinish` (or an error).
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    async fn stream(&self, call: ModelCall) -> Result<BoxStream<'static, Result<DeltaEvent>>>;

    /// Model identifier, e.g. `"claude-sonnet-4-20250514"`.
    fn id(&self) -> &str;

    /// Provider identifier, e.g. `"anthropic"`.
    fn provider(&self) -> &str;

    /// Context window in tokens.
    fn context_window(&self) -> u64;

    /// USD cost of a step given its usage.
    fn cost(&self, usage: &co_domain::stream::Usage) -> f64;
}
