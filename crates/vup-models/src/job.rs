//! Upscale job definitions and lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::{ScaleFactor, UpscaleModel};

/// Video file extensions the pipeline accepts as input.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "avi", "mkv", "flv", "wmv", "webm", "mpeg", "mpg",
];

/// Returns true when the path has a supported video extension.
pub fn is_supported_video(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_lowercase();
            SUPPORTED_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle state.
///
/// `Failed` and `Cancelled` are reachable from every non-terminal state;
/// the success path runs Queued -> Decomposing -> Upscaling -> Recomposing
/// -> Succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job is waiting for an execution slot
    #[default]
    Queued,
    /// Extracting frames and audio from the source
    Decomposing,
    /// Driving the upscaler over frame batches
    Upscaling,
    /// Re-encoding frames and muxing audio
    Recomposing,
    /// Job completed successfully
    Succeeded,
    /// Job failed
    Failed,
    /// Job was cancelled by the submitter
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Decomposing => "decomposing",
            JobState::Upscaling => "upscaling",
            JobState::Recomposing => "recomposing",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single upscale request.
///
/// Immutable once submitted; the controller owns it for its lifetime and
/// tracks cancellation separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpscaleJob {
    /// Unique job ID
    pub job_id: JobId,
    /// Input video file, or a directory of videos (bulk mode)
    pub input_path: PathBuf,
    /// Directory receiving the final output file(s)
    pub output_dir: PathBuf,
    /// Upscaler model
    pub model: UpscaleModel,
    /// Integer scale factor
    pub scale: ScaleFactor,
    /// Frames per upscaler invocation; 0 means "use the configured default"
    pub batch_size: usize,
    /// Concurrent upscaler invocations; 0 means "use the configured default"
    pub concurrency: usize,
    /// When the job was created
    pub created_at: DateTime<Utc>,
}

impl UpscaleJob {
    /// Create a new job with default model and scale.
    pub fn new(input_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            job_id: JobId::new(),
            input_path: input_path.into(),
            output_dir: output_dir.into(),
            model: UpscaleModel::default(),
            scale: ScaleFactor::default(),
            batch_size: 0,
            concurrency: 0,
            created_at: Utc::now(),
        }
    }

    /// Set the upscaler model.
    pub fn with_model(mut self, model: UpscaleModel) -> Self {
        self.model = model;
        self
    }

    /// Set the scale factor.
    pub fn with_scale(mut self, scale: ScaleFactor) -> Self {
        self.scale = scale;
        self
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the upscale concurrency bound.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// True when the input is a directory of videos rather than a single file.
    pub fn is_bulk(&self) -> bool {
        self.input_path.is_dir()
    }

    /// Derive the output file name for a given source video.
    pub fn output_file_for(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("video");
        self.output_dir.join(format!("upscaled_{stem}.mp4"))
    }
}
