//! Upscaling pipeline orchestration.
//!
//! This crate sequences a submitted [`vup_models::UpscaleJob`] through
//! decompose -> batch upscale -> recompose, owns the per-job workspace and
//! cancellation, and fans progress events out to subscribers. The GUI (or
//! the `vup` CLI) is just another subscriber; it never participates in
//! pipeline logic.

pub mod batch;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod progress;
pub mod workspace;

pub use batch::{partition, BatchStatus, FrameBatch};
pub use config::PipelineConfig;
pub use controller::{JobController, JobHandle, JobOutcome};
pub use error::{PipelineError, PipelineResult};
pub use progress::ProgressBus;
pub use workspace::Workspace;
