//! Per-job workspace management.
//!
//! A workspace is a scoped temporary directory tree bound 1:1 to a job.
//! Release is guaranteed on every exit path: the controller releases it
//! explicitly, and `Drop` removes whatever is left if the job task unwinds
//! or is aborted before that happens.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};

/// Scoped directory tree holding all intermediate artifacts of one job.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    released: bool,
}

impl Workspace {
    /// Create the workspace tree under `work_root`, uniquely named by
    /// `label` (derived from the job identifier).
    ///
    /// Fails when the location is unwritable or already occupied by a
    /// colliding name.
    pub async fn acquire(work_root: &Path, label: &str) -> PipelineResult<Self> {
        let root = work_root.join(format!("job-{label}"));

        if root.exists() {
            return Err(PipelineError::workspace(format!(
                "workspace already exists: {}",
                root.display()
            )));
        }

        for dir in [
            root.clone(),
            root.join("frames-in"),
            root.join("frames-out"),
            root.join("batches-in"),
            root.join("batches-out"),
            root.join("audio"),
            root.join("staging"),
        ] {
            tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                PipelineError::workspace(format!("failed to create {}: {e}", dir.display()))
            })?;
        }

        debug!("Acquired workspace {}", root.display());
        Ok(Self {
            root,
            released: false,
        })
    }

    /// Workspace root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory receiving decomposed frames.
    pub fn frames_in(&self) -> PathBuf {
        self.root.join("frames-in")
    }

    /// Directory receiving the merged, ordered upscaled frames.
    pub fn frames_out(&self) -> PathBuf {
        self.root.join("frames-out")
    }

    /// Staged input frames for one batch.
    pub fn batch_input_dir(&self, batch_index: usize) -> PathBuf {
        self.root.join("batches-in").join(batch_index.to_string())
    }

    /// Upscaler output directory for one batch.
    pub fn batch_output_dir(&self, batch_index: usize) -> PathBuf {
        self.root.join("batches-out").join(batch_index.to_string())
    }

    /// Path for the extracted audio track.
    pub fn audio_path(&self) -> PathBuf {
        self.root.join("audio").join("audio.mka")
    }

    /// Staging path for the final output before atomic publication.
    pub fn staging_path(&self, file_name: &str) -> PathBuf {
        self.root.join("staging").join(file_name)
    }

    /// Recursively remove the tree.
    pub async fn release(mut self) -> PipelineResult<()> {
        self.released = true;
        debug!("Releasing workspace {}", self.root.display());
        tokio::fs::remove_dir_all(&self.root).await.map_err(|e| {
            PipelineError::workspace(format!(
                "failed to remove {}: {e}",
                self.root.display()
            ))
        })
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = std::fs::remove_dir_all(&self.root) {
                if self.root.exists() {
                    warn!(
                        "Failed to clean up workspace {}: {}",
                        self.root.display(),
                        e
                    );
                }
            }
        }
    }
}
