//! Tool registry and sandbox client.
//!
//! Tools are polymorphic over `{info(), permission(), call()}`. Every
//! builtin tool executes against the per-session sandbox container over
//! HTTP; the sandbox keys containers by session id and creates them
//! lazily on first use. Permission gating itself lives in the gateway's
//! broker — a tool only *describes* the permission its invocation
//! needs, or returns `None` for known-safe reads.

pub mod exec;
pub mod fetch;
pub mod file_ops;
pub mod lsp;
pub mod mcp;
pub mod registry;
pub mod sandbox;
pub mod search;

use serde::Serialize;
use serde_json::Value;

use co_domain::Result;

pub use registry::ToolRegistry;
pub use sandbox::SandboxClient;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Static description of a tool, exposed to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's input.
    pub parameters: Value,
}

/// The permission a specific invocation needs. Matched against the
/// session allowlist as `(tool, action, path)` with decreasing
/// specificity.
#[derive(Debug, Clone)]
pub struct PermissionSpec {
    pub action: String,
    pub path: Option<String>,
    pub description: String,
}

/// Request-scoped call context.
#[derive(Debug, Clone)]
pub struct CallCtx {
    pub session_id: String,
    pub call_id: String,
    /// Effective working directory inside the sandbox, already
    /// resolved (request override or the session's project workdir).
    pub workdir: String,
}

/// Typed result of a tool call.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            data: None,
            mime_type: None,
            metadata: None,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            data: None,
            mime_type: None,
            metadata: None,
            is_error: true,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn info(&self) -> ToolInfo;

    /// The permission this invocation requires; `None` for known-safe
    /// reads that skip the broker entirely.
    fn permission(&self, input: &Value) -> Option<PermissionSpec>;

    async fn call(&self, ctx: &CallCtx, input: Value) -> Result<ToolResponse>;
}

/// Pull a required string field out of a tool input.
pub(crate) fn require_str<'a>(input: &'a Value, field: &str) -> std::result::Result<&'a str, String> {
    match input.get(field).and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(format!("missing required argument: {field}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_str_validation() {
        let input = serde_json::json!({"path": "a.txt", "empty": ""});
        assert_eq!(require_str(&input, "path").unwrap(), "a.txt");
        assert!(require_str(&input, "empty").is_err());
        assert!(require_str(&input, "missing").is_err());
    }

    #[test]
    fn tool_response_serialization_omits_defaults() {
        let resp = ToolResponse::text("ok");
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["content"], "ok");
        assert!(v.get("data").is_none());
        let err = ToolResponse::error("bad");
        assert!(err.is_error);
    }
}
