//! Shell execution tools: `bash` plus background-job management.
//!
//! Foreground commands run to completion inside the sandbox (subject to
//! the sandbox timeout). With `background: true` the sandbox returns a
//! job id immediately; `job_output` and `job_kill` poll and stop those
//! jobs.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use co_domain::Result;

use crate::sandbox::{ExecuteRequest, SandboxClient};
use crate::{require_str, CallCtx, PermissionSpec, Tool, ToolInfo, ToolResponse};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// bash
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
struct BashInput {
    command: String,
    #[serde(default)]
    background: bool,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    workdir: Option<String>,
}

pub struct BashTool {
    sandbox: Arc<SandboxClient>,
}

impl BashTool {
    pub fn new(sandbox: Arc<SandboxClient>) -> Self {
        Self { sandbox }
    }
}

#[async_trait::async_trait]
impl Tool for BashTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "bash".into(),
            description: "Run a shell command in the session sandbox. Set background=true \
                          for long-running commands; poll them with job_output."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Shell command to execute" },
                    "background": { "type": "boolean", "description": "Run as a background job" },
                    "timeout_secs": { "type": "integer", "description": "Hard timeout in seconds" },
                    "workdir": { "type": "string", "description": "Working directory override" }
                },
                "required": ["command"]
            }),
        }
    }

    fn permission(&self, input: &Value) -> Option<PermissionSpec> {
        let command = input
            .get("command")
            .and_then(|c| c.as_str())
            .unwrap_or_default();
        Some(PermissionSpec {
            action: "execute".into(),
            path: None,
            description: format!("Run command: {command}"),
        })
    }

    async fn call(&self, ctx: &CallCtx, input: Value) -> Result<ToolResponse> {
        let input: BashInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return Ok(ToolResponse::error(format!("invalid bash arguments: {e}"))),
        };
        if input.command.trim().is_empty() {
            return Ok(ToolResponse::error("command must not be empty"));
        }

        let req = ExecuteRequest {
            command: input.command,
            workdir: Some(input.workdir.unwrap_or_else(|| ctx.workdir.clone())),
            timeout_secs: input.timeout_secs,
            background: input.background,
        };
        let resp = match self.sandbox.execute(&ctx.session_id, &req).await {
            Ok(r) => r,
            Err(e) => return Ok(ToolResponse::error(e.to_string())),
        };

        if let Some(job_id) = resp.job_id {
            return Ok(ToolResponse::text(format!(
                "Started background job {job_id}. Use job_output to read its output."
            ))
            .with_metadata(json!({"job_id": job_id})));
        }

        let mut content = resp.stdout;
        if !resp.stderr.is_empty() {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(&resp.stderr);
        }
        let exit_code = resp.exit_code.unwrap_or(0);
        if exit_code != 0 {
            return Ok(ToolResponse {
                content: format!("exit code {exit_code}\n{content}"),
                data: None,
                mime_type: None,
                metadata: Some(json!({"exit_code": exit_code})),
                is_error: true,
            });
        }
        Ok(ToolResponse::text(content).with_metadata(json!({"exit_code": exit_code})))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// job_output / job_kill
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct JobOutputTool {
    sandbox: Arc<SandboxClient>,
}

impl JobOutputTool {
    pub fn new(sandbox: Arc<SandboxClient>) -> Self {
        Self { sandbox }
    }
}

#[async_trait::async_trait]
impl Tool for JobOutputTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "job_output".into(),
            description: "Read output from a background job started by bash.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "job_id": { "type": "string", "description": "Background job id" },
                    "tail_lines": { "type": "integer", "description": "Only the last N lines" }
                },
                "required": ["job_id"]
            }),
        }
    }

    fn permission(&self, _input: &Value) -> Option<PermissionSpec> {
        None // read-only
    }

    async fn call(&self, ctx: &CallCtx, input: Value) -> Result<ToolResponse> {
        let job_id = match require_str(&input, "job_id") {
            Ok(id) => id.to_string(),
            Err(e) => return Ok(ToolResponse::error(e)),
        };
        let tail = input.get("tail_lines").and_then(|t| t.as_u64());
        match self.sandbox.job_output(&ctx.session_id, &job_id, tail).await {
            Ok(out) => {
                let status = if out.running {
                    "running".to_string()
                } else {
                    format!("exited with code {}", out.exit_code.unwrap_or(0))
                };
                Ok(
                    ToolResponse::text(format!("[{status}]\n{}", out.output)).with_metadata(
                        json!({"running": out.running, "exit_code": out.exit_code}),
                    ),
                )
            }
            Err(e) => Ok(ToolResponse::error(e.to_string())),
        }
    }
}

pub struct JobKillTool {
    sandbox: Arc<SandboxClient>,
}

impl JobKillTool {
    pub fn new(sandbox: Arc<SandboxClient>) -> Self {
        Self { sandbox }
    }
}

#[async_trait::async_trait]
impl Tool for JobKillTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "job_kill".into(),
            description: "Terminate a background job started by bash.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "job_id": { "type": "string", "description": "Background job id" }
                },
                "required": ["job_id"]
            }),
        }
    }

    fn permission(&self, input: &Value) -> Option<PermissionSpec> {
        let job_id = input
            .get("job_id")
            .and_then(|j| j.as_str())
            .unwrap_or_default();
        Some(PermissionSpec {
            action: "kill".into(),
            path: None,
            description: format!("Kill background job {job_id}"),
        })
    }

    async fn call(&self, ctx: &CallCtx, input: Value) -> Result<ToolResponse> {
        let job_id = match require_str(&input, "job_id") {
            Ok(id) => id.to_string(),
            Err(e) => return Ok(ToolResponse::error(e)),
        };
        match self.sandbox.job_kill(&ctx.session_id, &job_id).await {
            Ok(()) => Ok(ToolResponse::text(format!("Killed job {job_id}"))),
            Err(e) => Ok(ToolResponse::error(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bash_permission_carries_command() {
        let sandbox = Arc::new(
            SandboxClient::new("http://localhost:1", std::time::Duration::from_secs(1)).unwrap(),
        );
        let tool = BashTool::new(sandbox);
        let spec = tool
            .permission(&json!({"command": "rm -rf build"}))
            .unwrap();
        assert_eq!(spec.action, "execute");
        assert!(spec.description.contains("rm -rf build"));
    }

    #[test]
    fn job_output_skips_permission() {
        let sandbox = Arc::new(
            SandboxClient::new("http://localhost:1", std::time::Duration::from_secs(1)).unwrap(),
        );
        let tool = JobOutputTool::new(sandbox);
        assert!(tool.permission(&json!({"job_id": "j1"})).is_none());
    }
}
