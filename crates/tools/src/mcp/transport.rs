//! Stdio transport: spawn the MCP server as a child process and speak
//! newline-delimited JSON-RPC over its stdin/stdout. A `request_lock`
//! serializes whole request/response cycles so concurrent tool calls on
//! one server cannot interleave responses.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use co_domain::config::McpServerConfig;
use co_domain::{Error, Result};

use super::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Non-JSON lines (banners, logs) tolerated before a response.
const MAX_SKIP_LINES: usize = 100;

pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
    request_lock: Mutex<()>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl StdioTransport {
    pub fn spawn(config: &McpServerConfig) -> Result<Self> {
        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Other("mcp server has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Other("mcp server has no stdout".into()))?;

        Ok(Self {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
            request_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse> {
        if !self.is_alive() {
            return Err(Error::Other("mcp server process has exited".into()));
        }
        let _cycle = self.request_lock.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        let line = serde_json::to_string(&request)?;

        {
            let mut stdin = self.stdin.lock().await;
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await?;
        }

        let response = tokio::time::timeout(REQUEST_TIMEOUT, self.read_response(id))
            .await
            .map_err(|_| Error::Timeout(format!("mcp {method}")))??;
        Ok(response)
    }

    pub async fn send_notification(&self, method: &str) -> Result<()> {
        let notification = JsonRpcNotification::new(method);
        let line = serde_json::to_string(&notification)?;
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn read_response(&self, want_id: u64) -> Result<JsonRpcResponse> {
        let mut stdout = self.stdout.lock().await;
        let mut skipped = 0usize;
        loop {
            let mut line = String::new();
            let n = stdout.read_line(&mut line).await?;
            if n == 0 {
                self.alive.store(false, Ordering::Release);
                return Err(Error::Other("mcp server closed stdout".into()));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) if resp.id == want_id => return Ok(resp),
                // Server-initiated notifications and stale responses
                // are skipped.
                Ok(_) | Err(_) => {
                    skipped += 1;
                    if skipped > MAX_SKIP_LINES {
                        self.alive.store(false, Ordering::Release);
                        return Err(Error::Other(
                            "mcp server is emitting garbage instead of responses".into(),
                        ));
                    }
                }
            }
        }
    }

    pub async fn shutdown(&self) {
        self.alive.store(false, Ordering::Release);
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
    }
}
