//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Pipeline configuration.
///
/// Job-level settings (`batch_size`, `concurrency`) act as defaults that a
/// submitted job may override.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Frames per upscaler invocation
    pub batch_size: usize,
    /// Retries per failed batch (not counting the initial attempt)
    pub max_batch_retries: u32,
    /// Concurrent upscaler invocations within one job
    pub upscale_concurrency: usize,
    /// Timeout per upscaler invocation
    pub batch_timeout: Duration,
    /// Jobs allowed to consume the accelerator budget at once
    pub max_concurrent_jobs: usize,
    /// Root directory for per-job workspaces
    pub work_root: PathBuf,
    /// Progress event buffer per subscriber
    pub event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            max_batch_retries: 2,
            upscale_concurrency: 1,
            batch_timeout: Duration::from_secs(3600),
            max_concurrent_jobs: 1,
            work_root: std::env::temp_dir().join("vup"),
            event_capacity: 256,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: env_parse("VUP_BATCH_SIZE").unwrap_or(defaults.batch_size),
            max_batch_retries: env_parse("VUP_BATCH_RETRIES")
                .unwrap_or(defaults.max_batch_retries),
            upscale_concurrency: env_parse("VUP_UPSCALE_CONCURRENCY")
                .unwrap_or(defaults.upscale_concurrency),
            batch_timeout: env_parse("VUP_BATCH_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.batch_timeout),
            max_concurrent_jobs: env_parse("VUP_MAX_JOBS").unwrap_or(defaults.max_concurrent_jobs),
            work_root: std::env::var("VUP_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_root),
            event_capacity: env_parse("VUP_EVENT_CAPACITY").unwrap_or(defaults.event_capacity),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
