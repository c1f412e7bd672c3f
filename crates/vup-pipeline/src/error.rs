//! Pipeline error types.

use thiserror::Error;
use vup_media::MediaError;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors terminating a pipeline stage or a whole job.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Decompose failed: {reason}")]
    Decompose { reason: String },

    #[error("Upscale failed for batch {batch_index}: {reason}")]
    Upscale { batch_index: usize, reason: String },

    #[error("Recompose failed: {reason}")]
    Recompose { reason: String },

    #[error("Job cancelled")]
    Cancelled,

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn workspace(msg: impl Into<String>) -> Self {
        Self::Workspace(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Wrap a media error from the decompose stage, preserving cancellation.
    pub fn decompose_from(e: MediaError) -> Self {
        if e.is_cancelled() {
            return Self::Cancelled;
        }
        Self::Decompose {
            reason: media_reason(&e),
        }
    }

    /// Wrap a media error from one batch of the upscale stage.
    pub fn upscale_from(batch_index: usize, e: MediaError) -> Self {
        if e.is_cancelled() {
            return Self::Cancelled;
        }
        Self::Upscale {
            batch_index,
            reason: media_reason(&e),
        }
    }

    /// Wrap an upscale failure that is not a media error (e.g. a short
    /// output count).
    pub fn upscale(batch_index: usize, reason: impl Into<String>) -> Self {
        Self::Upscale {
            batch_index,
            reason: reason.into(),
        }
    }

    /// Wrap a media error from the recompose stage, preserving cancellation.
    pub fn recompose_from(e: MediaError) -> Self {
        if e.is_cancelled() {
            return Self::Cancelled;
        }
        Self::Recompose {
            reason: media_reason(&e),
        }
    }

    /// Error kind reported in `JobFailed` events.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Workspace(_) => "workspace",
            PipelineError::Decompose { .. } => "decompose",
            PipelineError::Upscale { .. } => "upscale",
            PipelineError::Recompose { .. } => "recompose",
            PipelineError::Cancelled => "cancelled",
            PipelineError::Media(_) => "media",
            PipelineError::Internal(_) => "internal",
            PipelineError::Io(_) => "io",
        }
    }

    /// True for the cooperative-cancellation sentinel.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

/// Render a media error for a failure report, appending the captured stderr
/// tail when one exists.
fn media_reason(e: &MediaError) -> String {
    match e {
        MediaError::ToolFailed {
            stderr_tail: Some(tail),
            ..
        } => format!("{e}\n{tail}"),
        _ => e.to_string(),
    }
}
