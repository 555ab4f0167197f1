//! Error taxonomy for the daemon.
//!
//! Only [`DaemonError::QuarantineFailed`] and startup I/O errors are fatal.
//! Everything else is recovered or reported back to the caller as JSON.

use std::path::PathBuf;

use crate::llm::BrainError;

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// The state file could not be parsed. Recovered by quarantine + default state.
    #[error("state file {path} is corrupt: {reason}")]
    StateCorruption { path: PathBuf, reason: String },
    #[error("failed to quarantine corrupt state file {path}: {source}")]
    QuarantineFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("brain unavailable: {0}")]
    BrainUnavailable(String),
    #[error("command denied: matches `{pattern}`")]
    CommandDenied { pattern: String },
    #[error("command timed out after {0}s")]
    CommandTimeout(u64),
    #[error("command could not be started: {0}")]
    CommandSpawn(String),
    #[error("invalid request: {0}")]
    ProtocolDecode(String),
    #[error("Unknown: {0}")]
    UnknownCommand(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;

impl From<BrainError> for DaemonError {
    fn from(e: BrainError) -> Self {
        DaemonError::BrainUnavailable(e.to_string())
    }
}

impl DaemonError {
    /// Errors that must take the daemon down at startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DaemonError::QuarantineFailed { .. })
    }
}
