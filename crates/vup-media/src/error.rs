//! Error types for external tool operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while driving external tools.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} not found in PATH")]
    ToolNotFound(&'static str),

    #[error("{tool} failed: {message}")]
    ToolFailed {
        tool: String,
        message: String,
        stderr_tail: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("No frames extracted from {0}")]
    NoFrames(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    /// Create a tool failure error.
    pub fn tool_failed(
        tool: impl Into<String>,
        message: impl Into<String>,
        stderr_tail: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            message: message.into(),
            stderr_tail,
            exit_code,
        }
    }

    /// True when the error is the cooperative-cancellation sentinel.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MediaError::Cancelled)
    }
}
