//! Network tools: `fetch` (URL → text for the model) and `download`
//! (URL → file in the sandbox), plus the [`UrlFetcher`] capability the
//! agent uses to hydrate image attachments.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde_json::{json, Value};

use co_domain::{Error, Result};

use crate::sandbox::SandboxClient;
use crate::{require_str, CallCtx, PermissionSpec, Tool, ToolInfo, ToolResponse};

const MAX_FETCH_BYTES: usize = 1_000_000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// UrlFetcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `fetch(url) -> (bytes, mime_type)`, size-capped. Shared by the
/// fetch/download tools and by attachment hydration. Relative paths
/// resolve against the configured object-storage base URL.
#[derive(Clone)]
pub struct UrlFetcher {
    client: reqwest::Client,
    storage_base_url: Option<String>,
}

impl UrlFetcher {
    pub fn new() -> Result<Self> {
        Self::with_storage(None)
    }

    pub fn with_storage(storage_base_url: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            client,
            storage_base_url: storage_base_url.filter(|s| !s.is_empty()),
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<(Vec<u8>, String)> {
        let resolved;
        let url = if url.starts_with("http://") || url.starts_with("https://") {
            url
        } else if let Some(base) = &self.storage_base_url {
            resolved = format!("{}/{}", base.trim_end_matches('/'), url.trim_start_matches('/'));
            &resolved
        } else {
            return Err(Error::Http(format!("unsupported URL scheme: {url}")));
        };
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::Http(format!(
                "GET {url}: HTTP {}",
                resp.status().as_u16()
            )));
        }
        let mime = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .split(';')
            .next()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let mut data = bytes.to_vec();
        data.truncate(MAX_FETCH_BYTES);
        Ok((data, mime))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// fetch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FetchTool {
    fetcher: UrlFetcher,
}

impl FetchTool {
    pub fn new(fetcher: UrlFetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait::async_trait]
impl Tool for FetchTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "fetch".into(),
            description: "Fetch a URL and return its content as text (truncated to 1 MB)."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "URL to fetch" }
                },
                "required": ["url"]
            }),
        }
    }

    fn permission(&self, input: &Value) -> Option<PermissionSpec> {
        let url = input.get("url").and_then(|u| u.as_str()).unwrap_or("?");
        Some(PermissionSpec {
            action: "fetch".into(),
            path: None,
            description: format!("Fetch URL: {url}"),
        })
    }

    async fn call(&self, _ctx: &CallCtx, input: Value) -> Result<ToolResponse> {
        let url = match require_str(&input, "url") {
            Ok(u) => u.to_string(),
            Err(e) => return Ok(ToolResponse::error(e)),
        };
        match self.fetcher.fetch(&url).await {
            Ok((bytes, mime)) => {
                if mime.starts_with("text/")
                    || mime == "application/json"
                    || mime == "application/xml"
                {
                    Ok(ToolResponse {
                        content: String::from_utf8_lossy(&bytes).into_owned(),
                        data: None,
                        mime_type: Some(mime),
                        metadata: Some(json!({"bytes": bytes.len()})),
                        is_error: false,
                    })
                } else {
                    Ok(ToolResponse::error(format!(
                        "unsupported content type {mime}; use download to save binary content"
                    )))
                }
            }
            Err(e) => Ok(ToolResponse::error(e.to_string())),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// download
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DownloadTool {
    fetcher: UrlFetcher,
    sandbox: Arc<SandboxClient>,
}

impl DownloadTool {
    pub fn new(fetcher: UrlFetcher, sandbox: Arc<SandboxClient>) -> Self {
        Self { fetcher, sandbox }
    }
}

#[async_trait::async_trait]
impl Tool for DownloadTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "download".into(),
            description: "Download a URL into a file inside the sandbox.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "URL to download" },
                    "path": { "type": "string", "description": "Destination file path" }
                },
                "required": ["url", "path"]
            }),
        }
    }

    fn permission(&self, input: &Value) -> Option<PermissionSpec> {
        let url = input.get("url").and_then(|u| u.as_str()).unwrap_or("?");
        let path = input.get("path").and_then(|p| p.as_str()).unwrap_or("?");
        Some(PermissionSpec {
            action: "download".into(),
            path: Some(path.to_string()),
            description: format!("Download {url} to {path}"),
        })
    }

    async fn call(&self, ctx: &CallCtx, input: Value) -> Result<ToolResponse> {
        let url = match require_str(&input, "url") {
            Ok(u) => u.to_string(),
            Err(e) => return Ok(ToolResponse::error(e)),
        };
        let path = match require_str(&input, "path") {
            Ok(p) => p.to_string(),
            Err(e) => return Ok(ToolResponse::error(e)),
        };
        let (bytes, mime) = match self.fetcher.fetch(&url).await {
            Ok(r) => r,
            Err(e) => return Ok(ToolResponse::error(e.to_string())),
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        match self
            .sandbox
            .file_write_bytes(&ctx.session_id, &path, &encoded)
            .await
        {
            Ok(()) => Ok(ToolResponse::text(format!(
                "Downloaded {} bytes ({mime}) to {path}",
                bytes.len()
            ))),
            Err(e) => Ok(ToolResponse::error(e.to_string())),
        }
    }
}
