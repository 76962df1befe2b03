//! Process configuration: a YAML file plus environment overrides.
//!
//! Every section has serde defaults so a missing file still yields a
//! runnable dev config. `Config::validate` reports issues with a
//! severity; errors abort startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub event_stream: EventStreamConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auto_model: AutoModelConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub options: OptionsConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Bearer token clients must present at WebSocket upgrade. `None`
    /// disables auth (dev mode).
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            auth_token: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persistence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file holding sessions, messages, tool calls, and
    /// per-session model configs.
    #[serde(default = "d_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: d_db_path() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStreamConfig {
    /// Directory for event-log snapshots.
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
    /// Maximum entries retained per session (oldest trimmed first).
    #[serde(default = "d_stream_max_len")]
    pub stream_max_len: usize,
    /// Idle seconds before a session's stream expires.
    #[serde(default = "d_stream_ttl")]
    pub stream_ttl: u64,
}

impl Default for EventStreamConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
            stream_max_len: d_stream_max_len(),
            stream_ttl: d_stream_ttl(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sandbox / storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "d_sandbox_url")]
    pub base_url: String,
    /// Per-call timeout in seconds for sandbox HTTP requests.
    #[serde(default = "d_sandbox_timeout")]
    pub timeout_secs: u64,
    /// Root under which each project's working directory lives inside
    /// the container (`<workdir_root>/<project_id>`).
    #[serde(default = "d_workdir_root")]
    pub workdir_root: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            base_url: d_sandbox_url(),
            timeout_secs: d_sandbox_timeout(),
            workdir_root: d_workdir_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Base URL of the image/object storage the download tool and
    /// attachment hydration fetch from. Empty = direct URLs only.
    #[serde(default)]
    pub base_url: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Models
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Default model used for sessions created with `is_auto` or without an
/// explicit model config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoModelConfig {
    #[serde(default = "d_provider")]
    pub provider: String,
    #[serde(default = "d_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for AutoModelConfig {
    fn default() -> Self {
        Self {
            provider: d_provider(),
            model: d_model(),
            api_key: None,
        }
    }
}

/// Per-session model configuration, stored as a JSON blob in the
/// session store and reloaded at the start of every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionModelConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Small/cheap model for titles and summaries. Defaults per
    /// provider when absent.
    #[serde(default)]
    pub small_model: Option<String>,
    #[serde(default)]
    pub max_output_tokens: Option<u64>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    /// Request extended thinking from providers that support it.
    #[serde(default)]
    pub think: bool,
    /// Context window override; the model catalog supplies it when
    /// absent.
    #[serde(default)]
    pub context_window: Option<u64>,
}

impl SessionModelConfig {
    pub fn from_auto(auto: &AutoModelConfig) -> Self {
        Self {
            provider: auto.provider.clone(),
            model: auto.model.clone(),
            api_key: auto.api_key.clone(),
            base_url: None,
            small_model: None,
            max_output_tokens: None,
            temperature: None,
            top_p: None,
            reasoning_effort: None,
            think: false,
            context_window: None,
        }
    }

    /// API key with all but the last four characters masked, for read
    /// endpoints.
    pub fn masked_api_key(&self) -> Option<String> {
        self.api_key.as_ref().map(|k| {
            let tail: String = k
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            format!("****{tail}")
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Permissions / MCP / runtime knobs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PermissionsConfig {
    /// Auto-grant every permission request (non-interactive
    /// deployments).
    #[serde(default)]
    pub skip_requests: bool,
    /// Tools pre-approved for every session.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Minutes before an unanswered request counts as denied.
    #[serde(default = "d_permission_timeout")]
    pub timeout_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    /// MCP servers to start at boot, keyed by name.
    #[serde(default)]
    pub servers: std::collections::HashMap<String, McpServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OptionsConfig {
    #[serde(default)]
    pub disable_auto_summarize: bool,
    #[serde(default)]
    pub disable_metrics: bool,
    #[serde(default)]
    pub debug: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loading & validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Config {
    /// Load the config from a YAML file, then apply environment
    /// overrides. A missing file yields the defaults.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let mut config: Config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_yaml::from_str(&raw)
                .map_err(|e| crate::Error::Config(format!("{}: {e}", path.display())))?
        } else {
            Config::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Environment overrides for values that should not live in the
    /// YAML file (secrets) or that deployment tooling injects.
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("COBALT_AUTH_TOKEN") {
            self.server.auth_token = Some(v);
        }
        if let Ok(v) = std::env::var("COBALT_AUTO_MODEL_API_KEY") {
            self.auto_model.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("COBALT_DATABASE_PATH") {
            self.database.path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("COBALT_SANDBOX_URL") {
            self.sandbox.base_url = v;
        }
        if let Ok(v) = std::env::var("COBALT_PORT") {
            if let Ok(port) = v.parse() {
                self.server.port = port;
            }
        }
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.sandbox.base_url.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "sandbox.base_url must be set".into(),
            });
        }
        if self.auto_model.api_key.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "auto_model.api_key is unset; sessions without an explicit \
                          model config will fail to run"
                    .into(),
            });
        }
        if self.event_stream.stream_max_len == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "event_stream.stream_max_len must be > 0".into(),
            });
        }
        if self.server.auth_token.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "server.auth_token is unset; transport auth is disabled".into(),
            });
        }
        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_port() -> u16 {
    4900
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_db_path() -> PathBuf {
    PathBuf::from("./data/cobalt.db")
}
fn d_state_path() -> PathBuf {
    PathBuf::from("./data/state")
}
fn d_stream_max_len() -> usize {
    4096
}
fn d_stream_ttl() -> u64 {
    86_400
}
fn d_sandbox_url() -> String {
    "http://127.0.0.1:8722".into()
}
fn d_sandbox_timeout() -> u64 {
    300
}
fn d_workdir_root() -> String {
    "/workspace".into()
}
fn d_provider() -> String {
    "anthropic".into()
}
fn d_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn d_permission_timeout() -> u64 {
    30
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_runnable() {
        let config = Config::default();
        assert_eq!(config.server.port, 4900);
        assert_eq!(config.event_stream.stream_max_len, 4096);
        assert_eq!(config.permissions.timeout_minutes, 30);
        assert!(!config.permissions.skip_requests);
    }

    #[test]
    fn yaml_roundtrip_with_partial_file() {
        let yaml = r#"
server:
  port: 9000
sandbox:
  base_url: "http://sandbox:9999"
permissions:
  skip_requests: true
  allowed_tools: ["view", "ls"]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.sandbox.base_url, "http://sandbox:9999");
        assert!(config.permissions.skip_requests);
        assert_eq!(config.permissions.allowed_tools, vec!["view", "ls"]);
        // Untouched sections keep defaults.
        assert_eq!(config.event_stream.stream_ttl, 86_400);
    }

    #[test]
    fn validate_flags_missing_sandbox_url() {
        let mut config = Config::default();
        config.sandbox.base_url.clear();
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.message.contains("sandbox")));
    }

    #[test]
    fn masked_api_key_keeps_last_four() {
        let mut mc = SessionModelConfig::from_auto(&AutoModelConfig::default());
        mc.api_key = Some("sk-ant-abcdef1234".into());
        assert_eq!(mc.masked_api_key().as_deref(), Some("****1234"));

        mc.api_key = Some("ab".into());
        assert_eq!(mc.masked_api_key().as_deref(), Some("****ab"));

        mc.api_key = None;
        assert!(mc.masked_api_key().is_none());
    }

    #[test]
    fn session_model_config_json_blob_roundtrip() {
        let mut mc = SessionModelConfig::from_auto(&AutoModelConfig::default());
        mc.think = true;
        mc.temperature = Some(0.2);
        let blob = serde_json::to_string(&mc).unwrap();
        let back: SessionModelConfig = serde_json::from_str(&blob).unwrap();
        assert_eq!(back.provider, mc.provider);
        assert!(back.think);
        assert_eq!(back.temperature, Some(0.2));
    }
}
