//! File tools over the sandbox file API: `view`, `write`, `edit`,
//! `multi_edit`, `ls`.
//!
//! Reads (`view`, `ls`) skip the permission broker; writes describe the
//! touched path so "always allow" grants can be path-scoped.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use co_domain::Result;

use crate::sandbox::SandboxClient;
use crate::{require_str, CallCtx, PermissionSpec, Tool, ToolInfo, ToolResponse};

const VIEW_LINE_LIMIT: u64 = 2_000;

fn join_workdir(workdir: &str, path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{path}", workdir.trim_end_matches('/'))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// view
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ViewTool {
    sandbox: Arc<SandboxClient>,
}

impl ViewTool {
    pub fn new(sandbox: Arc<SandboxClient>) -> Self {
        Self { sandbox }
    }
}

#[async_trait::async_trait]
impl Tool for ViewTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "view".into(),
            description: "Read a file. Returns at most 2000 lines starting at offset.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path" },
                    "offset": { "type": "integer", "description": "First line to read (0-based)" },
                    "limit": { "type": "integer", "description": "Maximum lines to return" }
                },
                "required": ["path"]
            }),
        }
    }

    fn permission(&self, _input: &Value) -> Option<PermissionSpec> {
        None
    }

    async fn call(&self, ctx: &CallCtx, input: Value) -> Result<ToolResponse> {
        let path = match require_str(&input, "path") {
            Ok(p) => join_workdir(&ctx.workdir, p),
            Err(e) => return Ok(ToolResponse::error(e)),
        };
        let offset = input.get("offset").and_then(|o| o.as_u64());
        let limit = input
            .get("limit")
            .and_then(|l| l.as_u64())
            .map(|l| l.min(VIEW_LINE_LIMIT))
            .or(Some(VIEW_LINE_LIMIT));
        match self
            .sandbox
            .file_read(&ctx.session_id, &path, offset, limit)
            .await
        {
            Ok(resp) => Ok(ToolResponse::text(resp.content)),
            Err(e) => Ok(ToolResponse::error(e.to_string())),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// write
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WriteTool {
    sandbox: Arc<SandboxClient>,
}

impl WriteTool {
    pub fn new(sandbox: Arc<SandboxClient>) -> Self {
        Self { sandbox }
    }
}

#[async_trait::async_trait]
impl Tool for WriteTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "write".into(),
            description: "Create or overwrite a file with the given content.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path" },
                    "content": { "type": "string", "description": "Full file content" }
                },
                "required": ["path", "content"]
            }),
        }
    }

    fn permission(&self, input: &Value) -> Option<PermissionSpec> {
        let path = input.get("path").and_then(|p| p.as_str()).unwrap_or("?");
        Some(PermissionSpec {
            action: "write".into(),
            path: Some(path.to_string()),
            description: format!("Write file {path}"),
        })
    }

    async fn call(&self, ctx: &CallCtx, input: Value) -> Result<ToolResponse> {
        let path = match require_str(&input, "path") {
            Ok(p) => join_workdir(&ctx.workdir, p),
            Err(e) => return Ok(ToolResponse::error(e)),
        };
        let Some(content) = input.get("content").and_then(|c| c.as_str()) else {
            return Ok(ToolResponse::error("missing required argument: content"));
        };
        match self.sandbox.file_write(&ctx.session_id, &path, content).await {
            Ok(()) => Ok(ToolResponse::text(format!("Wrote {path}"))),
            Err(e) => Ok(ToolResponse::error(e.to_string())),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// edit / multi_edit
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
struct EditSpec {
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

fn validate_edit(edit: &EditSpec) -> Option<String> {
    if edit.old_string.is_empty() {
        return Some("old_string must not be empty".into());
    }
    if edit.old_string == edit.new_string {
        return Some("old_string and new_string are identical".into());
    }
    None
}

pub struct EditTool {
    sandbox: Arc<SandboxClient>,
}

impl EditTool {
    pub fn new(sandbox: Arc<SandboxClient>) -> Self {
        Self { sandbox }
    }
}

#[async_trait::async_trait]
impl Tool for EditTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "edit".into(),
            description: "Replace an exact string in a file. old_string must match \
                          exactly once unless replace_all is set."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path" },
                    "old_string": { "type": "string", "description": "Text to replace" },
                    "new_string": { "type": "string", "description": "Replacement text" },
                    "replace_all": { "type": "boolean", "description": "Replace every occurrence" }
                },
                "required": ["path", "old_string", "new_string"]
            }),
        }
    }

    fn permission(&self, input: &Value) -> Option<PermissionSpec> {
        let path = input.get("path").and_then(|p| p.as_str()).unwrap_or("?");
        Some(PermissionSpec {
            action: "edit".into(),
            path: Some(path.to_string()),
            description: format!("Edit file {path}"),
        })
    }

    async fn call(&self, ctx: &CallCtx, input: Value) -> Result<ToolResponse> {
        let path = match require_str(&input, "path") {
            Ok(p) => join_workdir(&ctx.workdir, p),
            Err(e) => return Ok(ToolResponse::error(e)),
        };
        let edit: EditSpec = match serde_json::from_value(input) {
            Ok(e) => e,
            Err(e) => return Ok(ToolResponse::error(format!("invalid edit arguments: {e}"))),
        };
        if let Some(msg) = validate_edit(&edit) {
            return Ok(ToolResponse::error(msg));
        }
        match self
            .sandbox
            .file_edit(
                &ctx.session_id,
                &path,
                &edit.old_string,
                &edit.new_string,
                edit.replace_all,
            )
            .await
        {
            Ok(resp) => Ok(ToolResponse::text(format!(
                "Applied {} replacement(s) in {path}",
                resp.replacements
            ))),
            Err(e) => Ok(ToolResponse::error(e.to_string())),
        }
    }
}

pub struct MultiEditTool {
    sandbox: Arc<SandboxClient>,
}

impl MultiEditTool {
    pub fn new(sandbox: Arc<SandboxClient>) -> Self {
        Self { sandbox }
    }
}

#[async_trait::async_trait]
impl Tool for MultiEditTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "multi_edit".into(),
            description: "Apply several edits to one file in order. Fails on the first \
                          edit that does not match; earlier edits stay applied."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path" },
                    "edits": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "old_string": { "type": "string" },
                                "new_string": { "type": "string" },
                                "replace_all": { "type": "boolean" }
                            },
                            "required": ["old_string", "new_string"]
                        }
                    }
                },
                "required": ["path", "edits"]
            }),
        }
    }

    fn permission(&self, input: &Value) -> Option<PermissionSpec> {
        let path = input.get("path").and_then(|p| p.as_str()).unwrap_or("?");
        Some(PermissionSpec {
            action: "edit".into(),
            path: Some(path.to_string()),
            description: format!("Edit file {path} ({} edits)", {
                input
                    .get("edits")
                    .and_then(|e| e.as_array())
                    .map(|e| e.len())
                    .unwrap_or(0)
            }),
        })
    }

    async fn call(&self, ctx: &CallCtx, input: Value) -> Result<ToolResponse> {
        let path = match require_str(&input, "path") {
            Ok(p) => join_workdir(&ctx.workdir, p),
            Err(e) => return Ok(ToolResponse::error(e)),
        };
        let edits: Vec<EditSpec> = match input
            .get("edits")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
        {
            Ok(Some(e)) => e,
            Ok(None) => return Ok(ToolResponse::error("missing required argument: edits")),
            Err(e) => return Ok(ToolResponse::error(format!("invalid edits: {e}"))),
        };
        if edits.is_empty() {
            return Ok(ToolResponse::error("edits must not be empty"));
        }
        for (i, edit) in edits.iter().enumerate() {
            if let Some(msg) = validate_edit(edit) {
                return Ok(ToolResponse::error(format!("edit {i}: {msg}")));
            }
        }

        let mut total = 0u64;
        for (i, edit) in edits.iter().enumerate() {
            match self
                .sandbox
                .file_edit(
                    &ctx.session_id,
                    &path,
                    &edit.old_string,
                    &edit.new_string,
                    edit.replace_all,
                )
                .await
            {
                Ok(resp) => total += resp.replacements,
                Err(e) => {
                    return Ok(ToolResponse::error(format!(
                        "edit {i} failed after {total} replacement(s): {e}"
                    )))
                }
            }
        }
        Ok(ToolResponse::text(format!(
            "Applied {total} replacement(s) across {} edit(s) in {path}",
            edits.len()
        )))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ls
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LsTool {
    sandbox: Arc<SandboxClient>,
}

impl LsTool {
    pub fn new(sandbox: Arc<SandboxClient>) -> Self {
        Self { sandbox }
    }
}

#[async_trait::async_trait]
impl Tool for LsTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "ls".into(),
            description: "List directory contents.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Directory path (default '.')" }
                }
            }),
        }
    }

    fn permission(&self, _input: &Value) -> Option<PermissionSpec> {
        None
    }

    async fn call(&self, ctx: &CallCtx, input: Value) -> Result<ToolResponse> {
        let path = input
            .get("path")
            .and_then(|p| p.as_str())
            .unwrap_or(".");
        let path = join_workdir(&ctx.workdir, path);
        match self.sandbox.file_list(&ctx.session_id, &path).await {
            Ok(resp) => {
                let listing = resp
                    .entries
                    .iter()
                    .map(|e| {
                        if e.is_dir {
                            format!("{}/", e.name)
                        } else {
                            e.name.clone()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(ToolResponse::text(listing)
                    .with_metadata(json!({"count": resp.entries.len()})))
            }
            Err(e) => Ok(ToolResponse::error(e.to_string())),
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
    fn join_workdir_behavior() {
        assert_eq!(join_workdir("/work/p1", "src/main.rs"), "/work/p1/src/main.rs");
        assert_eq!(join_workdir("/work/p1/", "a.txt"), "/work/p1/a.txt");
        assert_eq!(join_workdir("/work/p1", "/etc/hosts"), "/etc/hosts");
    }

    #[test]
    fn edit_validation() {
        assert!(validate_edit(&EditSpec {
            old_string: "".into(),
            new_string: "x".into(),
            replace_all: false,
        })
        .is_some());
        assert!(validate_edit(&EditSpec {
            old_string: "same".into(),
            new_string: "same".into(),
            replace_all: false,
        })
        .is_some());
        assert!(validate_edit(&EditSpec {
            old_string: "a".into(),
            new_string: "b".into(),
            replace_all: true,
        })
        .is_none());
    }

    #[test]
    fn write_permission_is_path_scoped() {
        let sandbox = Arc::new(
            SandboxClient::new("http://localhost:1", std::time::Duration::from_secs(1)).unwrap(),
        );
        let tool = WriteTool::new(sandbox);
        let spec = tool
            .permission(&json!({"path": "src/lib.rs", "content": "x"}))
            .unwrap();
        assert_eq!(spec.action, "write");
        assert_eq!(spec.path.as_deref(), Some("src/lib.rs"));
    }

    #[test]
    fn view_and_ls_skip_permission() {
        let sandbox = Arc::new(
            SandboxClient::new("http://localhost:1", std::time::Duration::from_secs(1)).unwrap(),
        );
        assert!(ViewTool::new(sandbox.clone())
            .permission(&json!({"path": "a"}))
            .is_none());
        assert!(LsTool::new(sandbox).permission(&json!({})).is_none());
    }
}
