//! Progress event fan-out.
//!
//! The bus decouples pipeline execution from its observers: events are
//! broadcast to every subscriber with a bounded per-subscriber buffer, and a
//! slow or absent subscriber loses events for itself only — the pipeline
//! never blocks on emission.

use std::path::Path;
use std::time::Duration;

use tokio::sync::broadcast;

use vup_models::{ProgressEvent, Stage};

/// Fan-out channel for [`ProgressEvent`]s.
#[derive(Debug, Clone)]
pub struct ProgressBus {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressBus {
    /// Create a bus with the given per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Never blocks, never fails the pipeline.
    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    /// Emit an info log line.
    pub fn log(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::log(message));
    }

    /// Emit a warning log line.
    pub fn warning(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::warning(message));
    }

    /// Emit an error log line.
    pub fn error_log(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::error(message));
    }

    pub fn stage_started(&self, stage: Stage) {
        self.emit(ProgressEvent::StageStarted { stage });
    }

    pub fn stage_progress(&self, stage: Stage, current: u64, total: u64) {
        self.emit(ProgressEvent::stage_progress(stage, current, total));
    }

    pub fn stage_completed(&self, stage: Stage, duration: Duration) {
        self.emit(ProgressEvent::StageCompleted {
            stage,
            duration_ms: duration.as_millis() as u64,
        });
    }

    pub fn failed(&self, kind: &str, message: impl Into<String>) {
        self.emit(ProgressEvent::JobFailed {
            kind: kind.to_string(),
            message: message.into(),
        });
    }

    pub fn cancelled(&self) {
        self.emit(ProgressEvent::JobCancelled {});
    }

    pub fn succeeded(&self, output_path: &Path, duration: Duration) {
        self.emit(ProgressEvent::JobSucceeded {
            output_path: output_path.to_path_buf(),
            duration_ms: duration.as_millis() as u64,
        });
    }
}
