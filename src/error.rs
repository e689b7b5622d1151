//! Error taxonomy for the tracker seams.
//!
//! Only the seams return these: the session entry points log and absorb them so a single bad
//! scan never stops the timers.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// The key-value store rejected a read or write.
    #[error("store unavailable: {0}")]
    Store(String),

    /// The outbound channel to the panel could not deliver.
    #[error("notification not delivered: {0}")]
    Transport(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl TrackerError {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
