use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("{collaborator} API error{}: {message}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Api {
        collaborator: String,
        status: Option<u16>,
        message: String,
    },

    #[error("{collaborator} returned an unexpected response: {message}")]
    Parse { collaborator: String, message: String },

    #[error("{step} found nothing: {reason}")]
    NoMatch { step: String, reason: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Blocking store task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),
}

impl ResolveError {
    pub fn api(collaborator: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        ResolveError::Api {
            collaborator: collaborator.to_string(),
            status,
            message: message.into(),
        }
    }

    pub fn parse(collaborator: &str, message: impl Into<String>) -> Self {
        ResolveError::Parse {
            collaborator: collaborator.to_string(),
            message: message.into(),
        }
    }

    pub fn no_match(step: &str, reason: impl Into<String>) -> Self {
        ResolveError::NoMatch {
            step: step.to_string(),
            reason: reason.into(),
        }
    }

    pub fn timeout(operation: &str, after_ms: u64) -> Self {
        ResolveError::Timeout {
            operation: operation.to_string(),
            after_ms,
        }
    }

    /// Errors a pipeline step may absorb before moving on to the next step.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ResolveError::Validation(_)
                | ResolveError::Timeout { .. }
                | ResolveError::Api { .. }
                | ResolveError::Parse { .. }
                | ResolveError::NoMatch { .. }
                | ResolveError::Http(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ResolveError>;

/// Fatal failures of a worker-pool run. These abort the whole invocation.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("worker {worker_id} terminated abnormally: {reason}")]
    WorkerCrashed { worker_id: usize, reason: String },

    #[error("worker channel closed with {outstanding} worker(s) still running")]
    ChannelClosed { outstanding: usize },

    #[error("pool needs at least one worker")]
    NoWorkers,
}
