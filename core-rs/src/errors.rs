//! Error types for mprocess

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MprocessError {
    /// No free port even after a full rescan of the universe
    #[error("Could not find a free port in {0}")]
    Exhausted(String),

    #[error("Failed to spawn {executable}: {source}")]
    SpawnFailed {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not connect to process on {address} during {} seconds", timeout.as_secs())]
    StartupTimeout { address: String, timeout: Duration },

    /// Only raised by callers that choose to treat a `false` from
    /// `ProcessSupervisor::terminate` as fatal.
    #[error("Process {0} still alive after termination request")]
    TerminationIncomplete(u32),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MprocessError {
    /// Whether a caller may reasonably retry the failed operation as-is
    /// (possibly with a different port or timeout).
    pub fn is_retryable(&self) -> bool {
        matches!(self, MprocessError::StartupTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, MprocessError>;
