//! Job controller.
//!
//! Sequences a submitted job through its stages as a strict barrier
//! pipeline, owns the workspace and the cancellation flag, and emits
//! progress events from every stage. At most `max_concurrent_jobs` jobs
//! consume the accelerator budget at a time; the rest stay queued.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use vup_media::{atomic_publish, InvocationCtl, Transcoder, Upscaler};
use vup_models::{is_supported_video, JobId, JobState, ProgressEvent, Stage, UpscaleJob};

use crate::config::PipelineConfig;
use crate::driver::{self, UpscaleSettings};
use crate::error::{PipelineError, PipelineResult};
use crate::progress::ProgressBus;
use crate::workspace::Workspace;

/// Result of a completed job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: JobId,
    /// Final output file(s); one entry per processed video
    pub outputs: Vec<PathBuf>,
    /// Total elapsed time including queueing
    pub duration: Duration,
}

/// Handle to a submitted job.
pub struct JobHandle {
    job_id: JobId,
    bus: ProgressBus,
    cancel_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<JobState>,
    task: JoinHandle<PipelineResult<JobOutcome>>,
    events: Option<broadcast::Receiver<ProgressEvent>>,
}

impl JobHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Take the receiver that was subscribed before the job started; unlike
    /// a late [`JobHandle::subscribe`], it observes every event from the
    /// beginning (within buffer capacity).
    pub fn take_events(&mut self) -> Option<broadcast::Receiver<ProgressEvent>> {
        self.events.take()
    }

    /// Subscribe to this job's progress events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.bus.subscribe()
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Current job state.
    pub fn state(&self) -> JobState {
        *self.state_rx.borrow()
    }

    /// Wait for the job to reach a terminal state.
    pub async fn wait(self) -> PipelineResult<JobOutcome> {
        self.task
            .await
            .map_err(|e| PipelineError::internal(format!("job task failed: {e}")))?
    }
}

/// Accepts upscale jobs and runs their pipelines.
pub struct JobController {
    config: PipelineConfig,
    transcoder: Arc<dyn Transcoder>,
    upscaler: Arc<dyn Upscaler>,
    job_slots: Arc<Semaphore>,
}

impl JobController {
    /// Create a controller over the given capabilities.
    pub fn new(
        config: PipelineConfig,
        transcoder: Arc<dyn Transcoder>,
        upscaler: Arc<dyn Upscaler>,
    ) -> Self {
        let job_slots = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            config,
            transcoder,
            upscaler,
            job_slots,
        }
    }

    /// Submit a job. Returns immediately; the pipeline runs in a background
    /// task and reports through the handle's event stream.
    pub fn submit(&self, job: UpscaleJob) -> JobHandle {
        let job_id = job.job_id.clone();
        let bus = ProgressBus::new(self.config.event_capacity);
        let events = bus.subscribe();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(JobState::Queued);

        let worker = JobWorker {
            job,
            config: self.config.clone(),
            transcoder: Arc::clone(&self.transcoder),
            upscaler: Arc::clone(&self.upscaler),
            bus: bus.clone(),
            cancel_rx,
            state_tx,
            job_slots: Arc::clone(&self.job_slots),
        };

        let task = tokio::spawn(worker.run());

        JobHandle {
            job_id,
            bus,
            cancel_tx,
            state_rx,
            task,
            events: Some(events),
        }
    }
}

/// Per-job pipeline execution state.
struct JobWorker {
    job: UpscaleJob,
    config: PipelineConfig,
    transcoder: Arc<dyn Transcoder>,
    upscaler: Arc<dyn Upscaler>,
    bus: ProgressBus,
    cancel_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<JobState>,
    job_slots: Arc<Semaphore>,
}

impl JobWorker {
    async fn run(self) -> PipelineResult<JobOutcome> {
        let started = Instant::now();
        let job_id = self.job.job_id.clone();
        info!(
            job_id = %job_id,
            input = %self.job.input_path.display(),
            model = %self.job.model,
            scale = %self.job.scale,
            "Job submitted"
        );

        // Hold a slot for the job's whole active lifetime; cancellation is
        // honored while still queued.
        let slot = tokio::select! {
            permit = Arc::clone(&self.job_slots).acquire_owned() => {
                permit.map_err(|_| PipelineError::internal("controller shut down"))
            }
            _ = wait_cancelled(self.cancel_rx.clone()) => Err(PipelineError::Cancelled),
        };

        let result = match slot {
            Ok(_permit) => self.execute().await,
            Err(e) => Err(e),
        };
        let duration = started.elapsed();

        match result {
            Ok(outputs) => {
                let _ = self.state_tx.send(JobState::Succeeded);
                let primary = if outputs.len() == 1 {
                    outputs[0].clone()
                } else {
                    self.job.output_dir.clone()
                };
                self.bus.succeeded(&primary, duration);
                info!(job_id = %job_id, duration_ms = duration.as_millis() as u64, "Job succeeded");
                Ok(JobOutcome {
                    job_id,
                    outputs,
                    duration,
                })
            }
            Err(e) if e.is_cancelled() => {
                let _ = self.state_tx.send(JobState::Cancelled);
                self.bus.cancelled();
                info!(job_id = %job_id, "Job cancelled");
                Err(e)
            }
            Err(e) => {
                let _ = self.state_tx.send(JobState::Failed);
                self.bus.failed(e.kind(), e.to_string());
                error!(job_id = %job_id, kind = e.kind(), "Job failed: {}", e);
                Err(e)
            }
        }
    }

    /// Run the pipeline over the job's input: one video, or every supported
    /// video under a directory (bulk mode).
    async fn execute(&self) -> PipelineResult<Vec<PathBuf>> {
        self.ensure_active()?;
        let input = &self.job.input_path;

        if input.is_dir() {
            let videos = find_video_files(input);
            if videos.is_empty() {
                return Err(PipelineError::Decompose {
                    reason: format!(
                        "no supported video files found in {}",
                        input.display()
                    ),
                });
            }

            let mut outputs = Vec::with_capacity(videos.len());
            for (index, video) in videos.iter().enumerate() {
                self.ensure_active()?;
                self.bus.log(format!(
                    "Processing {} ({}/{})",
                    video.display(),
                    index + 1,
                    videos.len()
                ));

                let relative = video.strip_prefix(input).unwrap_or(video.as_path());
                let out_file = match relative.parent() {
                    Some(parent) => self.job.output_dir.join(parent),
                    None => self.job.output_dir.clone(),
                }
                .join(output_file_name(video));

                let label = format!("{}-{index}", self.job.job_id);
                outputs.push(self.run_single(video, &out_file, &label).await?);
            }
            Ok(outputs)
        } else {
            if !input.is_file() {
                return Err(PipelineError::Decompose {
                    reason: format!("input is not readable: {}", input.display()),
                });
            }
            let out_file = self.job.output_file_for(input);
            Ok(vec![
                self.run_single(input, &out_file, self.job.job_id.as_str())
                    .await?,
            ])
        }
    }

    /// Process one video inside its own workspace, releasing the workspace
    /// on every exit path.
    async fn run_single(
        &self,
        video: &Path,
        output_file: &Path,
        label: &str,
    ) -> PipelineResult<PathBuf> {
        let ws = Workspace::acquire(&self.config.work_root, label).await?;

        let result = self.process_video(&ws, video, output_file).await;

        // Cleanup runs for success, failure and cancellation alike; a
        // teardown error after the pipeline finished is reported but does
        // not change the job outcome.
        if let Err(e) = ws.release().await {
            warn!(job_id = %self.job.job_id, "Workspace cleanup failed: {}", e);
            self.bus.warning(format!("workspace cleanup failed: {e}"));
        }

        result?;
        Ok(output_file.to_path_buf())
    }

    /// The staged barrier pipeline for one video.
    async fn process_video(
        &self,
        ws: &Workspace,
        video: &Path,
        output_file: &Path,
    ) -> PipelineResult<()> {
        // ---- Decompose
        self.enter_stage(JobState::Decomposing, Stage::Decompose)?;
        let stage_start = Instant::now();
        let ctl = self.invocation_ctl();

        let info = self
            .transcoder
            .probe(video)
            .await
            .map_err(PipelineError::decompose_from)?;
        self.bus.log(format!(
            "Source: {}x{} @ {:.3} fps, {}",
            info.width,
            info.height,
            info.fps,
            if info.has_audio { "audio" } else { "no audio" }
        ));

        let frames_in = ws.frames_in();
        let frame_count = self
            .transcoder
            .extract_frames(video, &frames_in, &ctl)
            .await
            .map_err(PipelineError::decompose_from)?;
        self.bus
            .stage_progress(Stage::Decompose, frame_count as u64, frame_count as u64);

        let audio_path = if info.has_audio {
            let path = self
                .transcoder
                .extract_audio(video, &ws.audio_path(), &ctl)
                .await
                .map_err(PipelineError::decompose_from)?;
            Some(path)
        } else {
            None
        };
        self.bus
            .stage_completed(Stage::Decompose, stage_start.elapsed());

        // ---- Upscale (decomposition fully completed above: the upscaler
        // operates on a static input directory)
        self.enter_stage(JobState::Upscaling, Stage::Upscale)?;
        let stage_start = Instant::now();
        let settings = self.upscale_settings();
        let merged_dir = driver::run_batches(
            ws,
            frame_count,
            &settings,
            Arc::clone(&self.upscaler),
            &self.bus,
            &self.cancel_rx,
        )
        .await?;
        self.bus
            .stage_completed(Stage::Upscale, stage_start.elapsed());

        // ---- Recompose
        self.enter_stage(JobState::Recomposing, Stage::Recompose)?;
        let stage_start = Instant::now();
        let file_name = output_file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PipelineError::Recompose {
                reason: format!("invalid output path: {}", output_file.display()),
            })?;
        let staging = ws.staging_path(file_name);

        self.transcoder
            .compose(
                &merged_dir,
                info.fps,
                audio_path.as_deref(),
                &staging,
                &ctl,
            )
            .await
            .map_err(PipelineError::recompose_from)?;
        atomic_publish(&staging, output_file)
            .await
            .map_err(PipelineError::recompose_from)?;
        self.bus
            .stage_completed(Stage::Recompose, stage_start.elapsed());

        self.bus
            .log(format!("Wrote {}", output_file.display()));
        Ok(())
    }

    /// Transition into a stage, honoring cancellation at the boundary.
    fn enter_stage(&self, state: JobState, stage: Stage) -> PipelineResult<()> {
        self.ensure_active()?;
        let _ = self.state_tx.send(state);
        self.bus.stage_started(stage);
        info!(job_id = %self.job.job_id, stage = %stage, "Stage started");
        Ok(())
    }

    fn ensure_active(&self) -> PipelineResult<()> {
        if *self.cancel_rx.borrow() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Control handle shared by this job's external invocations: the job's
    /// cancel flag, and stderr relayed into log events.
    fn invocation_ctl(&self) -> InvocationCtl {
        let bus = self.bus.clone();
        InvocationCtl::new()
            .with_cancel(self.cancel_rx.clone())
            .with_log_sink(move |line| bus.log(line))
    }

    fn upscale_settings(&self) -> UpscaleSettings {
        UpscaleSettings {
            model: self.job.model,
            scale: self.job.scale,
            batch_size: if self.job.batch_size > 0 {
                self.job.batch_size
            } else {
                self.config.batch_size
            },
            concurrency: if self.job.concurrency > 0 {
                self.job.concurrency
            } else {
                self.config.upscale_concurrency
            },
            max_retries: self.config.max_batch_retries,
            batch_timeout: self.config.batch_timeout,
        }
    }
}

/// Derive the output file name for a source video.
fn output_file_name(video: &Path) -> String {
    let stem = video
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("video");
    format!("upscaled_{stem}.mp4")
}

/// Recursively collect supported video files under a directory, in a
/// deterministic order.
fn find_video_files(dir: &Path) -> Vec<PathBuf> {
    let mut videos = Vec::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if is_supported_video(&path) {
                videos.push(path);
            }
        }
    }

    videos.sort();
    videos
}

/// Resolves when the cancel flag becomes true.
async fn wait_cancelled(mut rx: watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
    // Sender dropped without cancelling
    std::future::pending::<()>().await
}
