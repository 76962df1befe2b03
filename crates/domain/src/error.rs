/// Shared error type used across all Cobalt crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("database: {0}")]
    Database(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider error: {title}: {message}")]
    Provider { title: String, message: String },

    #[error("tool {name}: {message}")]
    Tool { name: String, message: String },

    #[error("permission denied")]
    PermissionDenied,

    #[error("cancelled")]
    Cancelled,

    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("session not found: {0}")]
    SessionMissing(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("session {0} is busy")]
    SessionBusy(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when the error terminates the whole run rather than a single
    /// tool call.
    pub fn is_run_terminal(&self) -> bool {
        matches!(
            self,
            Error::PermissionDenied | Error::Cancelled | Error::Provider { .. }
        )
    }
}
