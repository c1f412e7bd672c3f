//! Progress event schemas.
//!
//! Events are immutable records emitted by the pipeline and consumed by any
//! number of subscribers (a GUI log view, the CLI, tests). Subscribers never
//! feed anything back through this channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Frame/audio extraction
    Decompose,
    /// Batch upscaling
    Upscale,
    /// Final encode and mux
    Recompose,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Decompose => "decompose",
            Stage::Upscale => "upscale",
            Stage::Recompose => "recompose",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity of a log line event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSeverity {
    Info,
    Warning,
    Error,
}

/// Progress event envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A pipeline stage began
    StageStarted { stage: Stage },

    /// Progress within a stage, in processed units (frames or batches)
    StageProgress {
        stage: Stage,
        current: u64,
        total: u64,
        percent: f64,
    },

    /// A pipeline stage finished
    StageCompleted { stage: Stage, duration_ms: u64 },

    /// A log line, usually relayed from an external tool's stderr
    Log {
        severity: LogSeverity,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// The job reached the Failed terminal state
    JobFailed { kind: String, message: String },

    /// The job reached the Cancelled terminal state
    JobCancelled {},

    /// The job reached the Succeeded terminal state
    JobSucceeded {
        output_path: PathBuf,
        duration_ms: u64,
    },
}

impl ProgressEvent {
    /// Create an info log event.
    pub fn log(message: impl Into<String>) -> Self {
        ProgressEvent::Log {
            severity: LogSeverity::Info,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a warning log event.
    pub fn warning(message: impl Into<String>) -> Self {
        ProgressEvent::Log {
            severity: LogSeverity::Warning,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create an error log event.
    pub fn error(message: impl Into<String>) -> Self {
        ProgressEvent::Log {
            severity: LogSeverity::Error,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a stage progress event, clamping percent to 100.
    pub fn stage_progress(stage: Stage, current: u64, total: u64) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            ((current as f64 / total as f64) * 100.0).min(100.0)
        };
        ProgressEvent::StageProgress {
            stage,
            current,
            total,
            percent,
        }
    }

    /// True for the three terminal outcome events.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::JobFailed { .. }
                | ProgressEvent::JobCancelled {}
                | ProgressEvent::JobSucceeded { .. }
        )
    }
}
