//! Batch upscale driver.
//!
//! Partitions the decomposed frame sequence into contiguous batches and
//! drives the upscaler capability over them: per-batch staging, invocation
//! with timeout and cancellation, output completeness verification,
//! clear-and-retry within policy, and the final ordered merge.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::warn;

use vup_media::{
    count_files_with_ext, frame_file_name, move_file, InvocationCtl, Upscaler, FRAME_EXT,
};
use vup_models::{ScaleFactor, Stage, UpscaleModel};

use crate::batch::{partition, BatchStatus, FrameBatch};
use crate::error::{PipelineError, PipelineResult};
use crate::progress::ProgressBus;
use crate::workspace::Workspace;

/// Effective upscale-stage settings for one job.
#[derive(Debug, Clone)]
pub struct UpscaleSettings {
    pub model: UpscaleModel,
    pub scale: ScaleFactor,
    pub batch_size: usize,
    pub concurrency: usize,
    pub max_retries: u32,
    pub batch_timeout: Duration,
}

/// Run all batches and merge their outputs into one ordered directory.
///
/// Batches have no data dependency on each other and run concurrently up to
/// `settings.concurrency`; progress and failure are still reported in batch
/// index order. Returns the merged frame directory.
pub async fn run_batches(
    ws: &Workspace,
    frame_count: usize,
    settings: &UpscaleSettings,
    upscaler: Arc<dyn Upscaler>,
    bus: &ProgressBus,
    cancel_rx: &watch::Receiver<bool>,
) -> PipelineResult<PathBuf> {
    let batches = partition(frame_count, settings.batch_size)?;
    let total_frames = frame_count as u64;
    bus.stage_progress(Stage::Upscale, 0, total_frames);

    let mut results = futures::stream::iter(batches.into_iter().map(|batch| {
        let upscaler = Arc::clone(&upscaler);
        let bus = bus.clone();
        let cancel_rx = cancel_rx.clone();
        let settings = settings.clone();
        async move { run_single_batch(ws, batch, &settings, upscaler, &bus, &cancel_rx).await }
    }))
    .buffered(settings.concurrency.max(1));

    let mut completed_frames = 0u64;
    while let Some(result) = results.next().await {
        let batch = result?;
        completed_frames += batch.len() as u64;
        bus.stage_progress(Stage::Upscale, completed_frames, total_frames);
    }

    merge_batches(ws, frame_count, settings.batch_size).await
}

/// Run one batch to success or retry exhaustion.
async fn run_single_batch(
    ws: &Workspace,
    mut batch: FrameBatch,
    settings: &UpscaleSettings,
    upscaler: Arc<dyn Upscaler>,
    bus: &ProgressBus,
    cancel_rx: &watch::Receiver<bool>,
) -> PipelineResult<FrameBatch> {
    if *cancel_rx.borrow() {
        return Err(PipelineError::Cancelled);
    }
    batch.status = BatchStatus::Running;

    let input_dir = ws.batch_input_dir(batch.index);
    let output_dir = ws.batch_output_dir(batch.index);
    stage_batch_input(ws, &batch, &input_dir).await?;

    let ctl = {
        let bus = bus.clone();
        InvocationCtl::new()
            .with_cancel(cancel_rx.clone())
            .with_timeout(settings.batch_timeout)
            .with_log_sink(move |line| bus.log(line))
    };

    let mut last_reason = String::new();
    for attempt in 0..=settings.max_retries {
        if *cancel_rx.borrow() {
            return Err(PipelineError::Cancelled);
        }
        if attempt > 0 {
            batch.retries = attempt;
            bus.warning(format!(
                "Batch {} failed, retrying ({}/{}): {}",
                batch.index, attempt, settings.max_retries, last_reason
            ));
        }

        // A fresh output directory per attempt; stale partial output would
        // defeat the completeness check.
        reset_dir(&output_dir).await?;

        match upscaler
            .upscale_dir(&input_dir, &output_dir, settings.model, settings.scale, &ctl)
            .await
        {
            Ok(()) => {
                let produced = count_files_with_ext(&output_dir, FRAME_EXT)
                    .map_err(|e| PipelineError::upscale_from(batch.index, e))?;
                if produced == batch.len() {
                    batch.status = BatchStatus::Succeeded;
                    return Ok(batch);
                }
                // Exit code 0 with missing frames is a silent partial failure
                last_reason = format!(
                    "incomplete output: expected {} frames, found {}",
                    batch.len(),
                    produced
                );
                warn!(batch_index = batch.index, "{}", last_reason);
            }
            Err(e) if e.is_cancelled() => return Err(PipelineError::Cancelled),
            Err(e) => {
                last_reason = e.to_string();
                warn!(batch_index = batch.index, "Batch attempt failed: {}", e);
            }
        }
    }

    batch.status = BatchStatus::Failed;
    Err(PipelineError::upscale(batch.index, last_reason))
}

/// Stage the batch's frame subset into its input directory.
///
/// Hard links where possible, copies across filesystems.
async fn stage_batch_input(
    ws: &Workspace,
    batch: &FrameBatch,
    input_dir: &Path,
) -> PipelineResult<()> {
    tokio::fs::create_dir_all(input_dir).await?;
    for frame_index in batch.start..batch.end {
        let name = frame_file_name(frame_index as u64 + 1);
        let src = ws.frames_in().join(&name);
        let dst = input_dir.join(&name);
        if std::fs::hard_link(&src, &dst).is_err() {
            tokio::fs::copy(&src, &dst).await.map_err(|e| {
                PipelineError::upscale(batch.index, format!("failed to stage {name}: {e}"))
            })?;
        }
    }
    Ok(())
}

/// Remove and recreate a directory.
async fn reset_dir(dir: &Path) -> PipelineResult<()> {
    if dir.exists() {
        tokio::fs::remove_dir_all(dir).await?;
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

/// Merge every batch's output into one directory matching the decomposer's
/// numbering, and verify the merged total.
async fn merge_batches(
    ws: &Workspace,
    frame_count: usize,
    batch_size: usize,
) -> PipelineResult<PathBuf> {
    let merged_dir = ws.frames_out();

    for frame_index in 0..frame_count {
        let batch_index = frame_index / batch_size;
        let name = frame_file_name(frame_index as u64 + 1);
        let src = ws.batch_output_dir(batch_index).join(&name);
        let dst = merged_dir.join(&name);
        move_file(&src, &dst).await.map_err(|e| {
            PipelineError::upscale(batch_index, format!("missing upscaled frame {name}: {e}"))
        })?;
    }

    let merged = count_files_with_ext(&merged_dir, FRAME_EXT)?;
    if merged != frame_count {
        return Err(PipelineError::upscale(
            0,
            format!("merge produced {merged} frames, expected {frame_count}"),
        ));
    }
    Ok(merged_dir)
}
