//! HTTP client for the per-session sandbox service.
//!
//! The sandbox keys containers by `session_id` and creates them lazily
//! on the first call, so a container garbage-collected while a client
//! was away simply comes back fresh. All calls honor the configured
//! timeout; cancellation is propagated by dropping the in-flight
//! future.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use co_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteRequest {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Run as a background job; the response carries a `job_id`.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub background: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteResponse {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileReadResponse {
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirEntry {
    pub name: String,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileListResponse {
    #[serde(default)]
    pub entries: Vec<DirEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GrepMatch {
    pub path: String,
    pub line: u64,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileGrepResponse {
    #[serde(default)]
    pub matches: Vec<GrepMatch>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileGlobResponse {
    #[serde(default)]
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileEditResponse {
    #[serde(default)]
    pub replacements: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobOutputResponse {
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct SandboxClient {
    base_url: String,
    client: reqwest::Client,
}

impl SandboxClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post(&self, path: &str, session_id: &str, mut body: Value) -> Result<Value> {
        body["session_id"] = json!(session_id);
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("sandbox {path}: {e}"))
                } else {
                    Error::Http(format!("sandbox {path}: {e}"))
                }
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::Http(format!("sandbox {path}: {e}")))?;
        if !status.is_success() {
            return Err(Error::Http(format!(
                "sandbox {path}: HTTP {} - {text}",
                status.as_u16()
            )));
        }
        Ok(serde_json::from_str(&text)?)
    }

    // ── Command execution ─────────────────────────────────────────

    pub async fn execute(&self, session_id: &str, req: &ExecuteRequest) -> Result<ExecuteResponse> {
        let body = serde_json::to_value(req)?;
        let v = self.post("/execute", session_id, body).await?;
        Ok(serde_json::from_value(v)?)
    }

    pub async fn job_output(
        &self,
        session_id: &str,
        job_id: &str,
        tail_lines: Option<u64>,
    ) -> Result<JobOutputResponse> {
        let v = self
            .post(
                "/job/output",
                session_id,
                json!({"job_id": job_id, "tail_lines": tail_lines}),
            )
            .await?;
        Ok(serde_json::from_value(v)?)
    }

    pub async fn job_kill(&self, session_id: &str, job_id: &str) -> Result<()> {
        self.post("/job/kill", session_id, json!({"job_id": job_id}))
            .await?;
        Ok(())
    }

    // ── File operations ───────────────────────────────────────────

    pub async fn file_read(
        &self,
        session_id: &str,
        path: &str,
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<FileReadResponse> {
        let v = self
            .post(
                "/file/read",
                session_id,
                json!({"path": path, "offset": offset, "limit": limit}),
            )
            .await?;
        Ok(serde_json::from_value(v)?)
    }

    pub async fn file_write(&self, session_id: &str, path: &str, content: &str) -> Result<()> {
        self.post(
            "/file/write",
            session_id,
            json!({"path": path, "content": content}),
        )
        .await?;
        Ok(())
    }

    /// Write raw bytes (base64 payload) — used by the download tool.
    pub async fn file_write_bytes(
        &self,
        session_id: &str,
        path: &str,
        content_base64: &str,
    ) -> Result<()> {
        self.post(
            "/file/write",
            session_id,
            json!({"path": path, "content_base64": content_base64}),
        )
        .await?;
        Ok(())
    }

    pub async fn file_list(&self, session_id: &str, path: &str) -> Result<FileListResponse> {
        let v = self
            .post("/file/list", session_id, json!({"path": path}))
            .await?;
        Ok(serde_json::from_value(v)?)
    }

    pub async fn file_grep(
        &self,
        session_id: &str,
        pattern: &str,
        path: &str,
        include: Option<&str>,
    ) -> Result<FileGrepResponse> {
        let v = self
            .post(
                "/file/grep",
                session_id,
                json!({"pattern": pattern, "path": path, "include": include}),
            )
            .await?;
        Ok(serde_json::from_value(v)?)
    }

    pub async fn file_glob(
        &self,
        session_id: &str,
        pattern: &str,
        path: &str,
    ) -> Result<FileGlobResponse> {
        let v = self
            .post(
                "/file/glob",
                session_id,
                json!({"pattern": pattern, "path": path}),
            )
            .await?;
        Ok(serde_json::from_value(v)?)
    }

    pub async fn file_edit(
        &self,
        session_id: &str,
        path: &str,
        old: &str,
        new: &str,
        replace_all: bool,
    ) -> Result<FileEditResponse> {
        let v = self
            .post(
                "/file/edit",
                session_id,
                json!({
                    "path": path,
                    "old_string": old,
                    "new_string": new,
                    "replace_all": replace_all,
                }),
            )
            .await?;
        Ok(serde_json::from_value(v)?)
    }

    // ── LSP sidecar ───────────────────────────────────────────────

    pub async fn lsp_diagnostics(&self, session_id: &str, path: Option<&str>) -> Result<Value> {
        self.post("/lsp/diagnostics", session_id, json!({"path": path}))
            .await
    }

    pub async fn lsp_references(
        &self,
        session_id: &str,
        path: &str,
        line: u64,
        column: u64,
    ) -> Result<Value> {
        self.post(
            "/lsp/references",
            session_id,
            json!({"path": path, "line": line, "column": column}),
        )
        .await
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(resp.status().is_success())
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let url = format!("{}/session/{session_id}", self.base_url);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        if !resp.status().is_success() && resp.status().as_u16() != 404 {
            return Err(Error::Http(format!(
                "sandbox delete_session: HTTP {}",
                resp.status().as_u16()
            )));
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
