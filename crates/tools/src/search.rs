//! Search tools: `grep` and `glob` over the sandbox file API. Both are
//! read-only and skip the permission broker.

use std::sync::Arc;

use serde_json::{json, Value};

use co_domain::Result;

use crate::sandbox::SandboxClient;
use crate::{require_str, CallCtx, PermissionSpec, Tool, ToolInfo, ToolResponse};

const MAX_MATCHES_SHOWN: usize = 200;

pub struct GrepTool {
    sandbox: Arc<SandboxClient>,
}

impl GrepTool {
    pub fn new(sandbox: Arc<SandboxClient>) -> Self {
        Self { sandbox }
    }
}

#[async_trait::async_trait]
impl Tool for GrepTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "grep".into(),
            description: "Search file contents with a regular expression.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Regex to search for" },
                    "path": { "type": "string", "description": "Directory to search (default '.')" },
                    "include": { "type": "string", "description": "Glob filter, e.g. '*.rs'" }
                },
                "required": ["pattern"]
            }),
        }
    }

    fn permission(&self, _input: &Value) -> Option<PermissionSpec> {
        None
    }

    async fn call(&self, ctx: &CallCtx, input: Value) -> Result<ToolResponse> {
        let pattern = match require_str(&input, "pattern") {
            Ok(p) => p.to_string(),
            Err(e) => return Ok(ToolResponse::error(e)),
        };
        let path = input
            .get("path")
            .and_then(|p| p.as_str())
            .unwrap_or(&ctx.workdir)
            .to_string();
        let include = input.get("include").and_then(|i| i.as_str());

        match self
            .sandbox
            .file_grep(&ctx.session_id, &pattern, &path, include)
            .await
        {
            Ok(resp) => {
                let total = resp.matches.len();
                let listing = resp
                    .matches
                    .iter()
                    .take(MAX_MATCHES_SHOWN)
                    .map(|m| format!("{}:{}: {}", m.path, m.line, m.text))
                    .collect::<Vec<_>>()
                    .join("\n");
                let content = if total > MAX_MATCHES_SHOWN {
                    format!("{listing}\n... ({total} matches, showing {MAX_MATCHES_SHOWN})")
                } else if total == 0 {
                    "No matches found".into()
                } else {
                    listing
                };
                Ok(ToolResponse::text(content).with_metadata(json!({"matches": total})))
            }
            Err(e) => Ok(ToolResponse::error(e.to_string())),
        }
    }
}

pub struct GlobTool {
    sandbox: Arc<SandboxClient>,
}

impl GlobTool {
    pub fn new(sandbox: Arc<SandboxClient>) -> Self {
        Self { sandbox }
    }
}

#[async_trait::async_trait]
impl Tool for GlobTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "glob".into(),
            description: "Find files by glob pattern, e.g. 'src/**/*.rs'.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Glob pattern" },
                    "path": { "type": "string", "description": "Root directory (default '.')" }
                },
                "required": ["pattern"]
            }),
        }
    }

    fn permission(&self, _input: &Value) -> Option<PermissionSpec> {
        None
    }

    async fn call(&self, ctx: &CallCtx, input: Value) -> Result<ToolResponse> {
        let pattern = match require_str(&input, "pattern") {
            Ok(p) => p.to_string(),
            Err(e) => return Ok(ToolResponse::error(e)),
        };
        let path = input
            .get("path")
            .and_then(|p| p.as_str())
            .unwrap_or(&ctx.workdir)
            .to_string();

        match self.sandbox.file_glob(&ctx.session_id, &pattern, &path).await {
            Ok(resp) => {
                let content = if resp.paths.is_empty() {
                    "No files matched".into()
                } else {
                    resp.paths.join("\n")
                };
                Ok(ToolResponse::text(content).with_metadata(json!({"count": resp.paths.len()})))
            }
            Err(e) => Ok(ToolResponse::error(e.to_string())),
        }
    }
}
