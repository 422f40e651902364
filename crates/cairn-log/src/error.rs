use std::io;

use cairn_types::Seq;

/// Errors produced by log operations.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("no entry at seq {0}")]
    NotFound(Seq),

    #[error("log has not finished loading")]
    NotLoaded,

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt record at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    #[error("log lock poisoned")]
    LockPoisoned,

    #[error("stream error: {0}")]
    Stream(String),
}

impl From<serde_json::Error> for LogError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Convenience alias used throughout the log crate.
pub type LogResult<T> = std::result::Result<T, LogError>;
