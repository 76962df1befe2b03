//! Minimal MCP client: stdio servers declared in config, handshaken at
//! boot, their tools registered under `mcp_<server>_<tool>` names.

pub mod protocol;
pub mod transport;

use std::sync::Arc;

use serde_json::{json, Value};

use co_domain::config::McpServerConfig;
use co_domain::{Error, Result};

use self::protocol::{call_result_text, initialize_params, McpToolDef, ToolsListResult};
use self::transport::StdioTransport;
use crate::{CallCtx, PermissionSpec, Tool, ToolInfo, ToolResponse};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct McpServer {
    pub name: String,
    pub tools: Vec<McpToolDef>,
    transport: Arc<StdioTransport>,
}

impl McpServer {
    /// Spawn the server, perform the MCP handshake, and discover tools.
    pub async fn connect(name: &str, config: &McpServerConfig) -> Result<Self> {
        let transport = Arc::new(StdioTransport::spawn(config)?);

        let resp = transport
            .send_request("initialize", Some(initialize_params()))
            .await?;
        if resp.is_error() {
            return Err(Error::Other(format!(
                "mcp {name} initialize failed: {}",
                resp.error.map(|e| e.to_string()).unwrap_or_default()
            )));
        }
        transport
            .send_notification("notifications/initialized")
            .await?;

        let resp = transport.send_request("tools/list", None).await?;
        let tools = match resp.result {
            Some(result) => serde_json::from_value::<ToolsListResult>(result)?.tools,
            None => Vec::new(),
        };

        tracing::info!(server = name, tools = tools.len(), "mcp server connected");
        Ok(Self {
            name: name.to_string(),
            tools,
            transport: transport.clone(),
        })
    }

    pub async fn shutdown(&self) {
        self.transport.shutdown().await;
    }

    /// Wrap every discovered tool as a registry [`Tool`].
    pub fn as_tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tools
            .iter()
            .map(|def| {
                Arc::new(McpTool {
                    server: self.name.clone(),
                    def: def.clone(),
                    transport: self.transport.clone(),
                }) as Arc<dyn Tool>
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Remote tool wrapper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct McpTool {
    server: String,
    def: McpToolDef,
    transport: Arc<StdioTransport>,
}

pub fn mcp_tool_name(server: &str, tool: &str) -> String {
    format!("mcp_{server}_{tool}")
}

#[async_trait::async_trait]
impl Tool for McpTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: mcp_tool_name(&self.server, &self.def.name),
            description: self
                .def
                .description
                .clone()
                .unwrap_or_else(|| format!("Tool {} from MCP server {}", self.def.name, self.server)),
            parameters: self
                .def
                .input_schema
                .clone()
                .unwrap_or_else(|| json!({"type": "object", "additionalProperties": true})),
        }
    }

    fn permission(&self, _input: &Value) -> Option<PermissionSpec> {
        // External code runs on the other side; always gated.
        Some(PermissionSpec {
            action: "call".into(),
            path: None,
            description: format!("Call MCP tool {} on {}", self.def.name, self.server),
        })
    }

    async fn call(&self, _ctx: &CallCtx, input: Value) -> Result<ToolResponse> {
        let resp = self
            .transport
            .send_request(
                "tools/call",
                Some(json!({"name": self.def.name, "arguments": input})),
            )
            .await;
        let resp = match resp {
            Ok(r) => r,
            Err(e) => return Ok(ToolResponse::error(e.to_string())),
        };
        if let Some(err) = resp.error {
            return Ok(ToolResponse::error(err.to_string()));
        }
        let result = resp.result.unwrap_or(Value::Null);
        let (text, is_error) = call_result_text(&result);
        Ok(ToolResponse {
            content: text,
            data: None,
            mime_type: None,
            metadata: None,
            is_error,
        })
    }
}
