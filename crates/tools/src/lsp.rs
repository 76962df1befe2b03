//! Language-intelligence tools backed by the sandbox's language-server
//! sidecar: `diagnostics` and `references`. Both read-only.

use std::sync::Arc;

use serde_json::{json, Value};

use co_domain::Result;

use crate::sandbox::SandboxClient;
use crate::{require_str, CallCtx, PermissionSpec, Tool, ToolInfo, ToolResponse};

pub struct DiagnosticsTool {
    sandbox: Arc<SandboxClient>,
}

impl DiagnosticsTool {
    pub fn new(sandbox: Arc<SandboxClient>) -> Self {
        Self { sandbox }
    }
}

#[async_trait::async_trait]
impl Tool for DiagnosticsTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "diagnostics".into(),
            description: "Get compiler/linter diagnostics for the project or one file."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Limit to one file (optional)" }
                }
            }),
        }
    }

    fn permission(&self, _input: &Value) -> Option<PermissionSpec> {
        None
    }

    async fn call(&self, ctx: &CallCtx, input: Value) -> Result<ToolResponse> {
        let path = input.get("path").and_then(|p| p.as_str());
        match self.sandbox.lsp_diagnostics(&ctx.session_id, path).await {
            Ok(v) => {
                let diags = v
                    .get("diagnostics")
                    .and_then(|d| d.as_array())
                    .cloned()
                    .unwrap_or_default();
                if diags.is_empty() {
                    return Ok(ToolResponse::text("No diagnostics"));
                }
                let listing = diags
                    .iter()
                    .map(|d| {
                        format!(
                            "{}:{}: {} {}",
                            d.get("path").and_then(|p| p.as_str()).unwrap_or("?"),
                            d.get("line").and_then(|l| l.as_u64()).unwrap_or(0),
                            d.get("severity").and_then(|s| s.as_str()).unwrap_or("info"),
                            d.get("message").and_then(|m| m.as_str()).unwrap_or(""),
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(ToolResponse::text(listing).with_metadata(json!({"count": diags.len()})))
            }
            Err(e) => Ok(ToolResponse::error(e.to_string())),
        }
    }
}

pub struct ReferencesTool {
    sandbox: Arc<SandboxClient>,
}

impl ReferencesTool {
    pub fn new(sandbox: Arc<SandboxClient>) -> Self {
        Self { sandbox }
    }
}

#[async_trait::async_trait]
impl Tool for ReferencesTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "references".into(),
            description: "Find references to the symbol at a file position.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path" },
                    "line": { "type": "integer", "description": "1-based line" },
                    "column": { "type": "integer", "description": "1-based column" }
                },
                "required": ["path", "line", "column"]
            }),
        }
    }

    fn permission(&self, _input: &Value) -> Option<PermissionSpec> {
        None
    }

    async fn call(&self, ctx: &CallCtx, input: Value) -> Result<ToolResponse> {
        let path = match require_str(&input, "path") {
            Ok(p) => p.to_string(),
            Err(e) => return Ok(ToolResponse::error(e)),
        };
        let (Some(line), Some(column)) = (
            input.get("line").and_then(|l| l.as_u64()),
            input.get("column").and_then(|c| c.as_u64()),
        ) else {
            return Ok(ToolResponse::error("line and column are required"));
        };

        match self
            .sandbox
            .lsp_references(&ctx.session_id, &path, line, column)
            .await
        {
            Ok(v) => {
                let refs = v
                    .get("references")
                    .and_then(|r| r.as_array())
                    .cloned()
                    .unwrap_or_default();
                if refs.is_empty() {
                    return Ok(ToolResponse::text("No references found"));
                }
                let listing = refs
                    .iter()
                    .map(|r| {
                        format!(
                            "{}:{}",
                            r.get("path").and_then(|p| p.as_str()).unwrap_or("?"),
                            r.get("line").and_then(|l| l.as_u64()).unwrap_or(0),
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(ToolResponse::text(listing).with_metadata(json!({"count": refs.len()})))
            }
            Err(e) => Ok(ToolResponse::error(e.to_string())),
        }
    }
}
