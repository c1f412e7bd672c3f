//! End-to-end pipeline tests over substitute capabilities.
//!
//! The transcoder and upscaler fakes write real files into the workspace, so
//! these tests exercise the full orchestration surface: staging, batching,
//! retries, merging, ordering, atomic publication and cleanup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use vup_media::{
    sorted_frames, InvocationCtl, MediaError, MediaResult, Transcoder, Upscaler, VideoInfo,
};
use vup_models::{JobState, ProgressEvent, ScaleFactor, Stage, UpscaleJob, UpscaleModel};
use vup_pipeline::{JobController, PipelineConfig};

/// Transcoder fake: decomposes a "video" into numbered marker frames and a
/// marker audio track, and composes them back into a text manifest.
struct FakeTranscoder {
    frame_count: usize,
    has_audio: bool,
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn probe(&self, input: &Path) -> MediaResult<VideoInfo> {
        if !input.is_file() {
            return Err(MediaError::FileNotFound(input.to_path_buf()));
        }
        Ok(VideoInfo {
            duration: self.frame_count as f64 / 24.0,
            width: 320,
            height: 180,
            fps: 24.0,
            codec: "h264".to_string(),
            has_audio: self.has_audio,
        })
    }

    async fn extract_frames(
        &self,
        input: &Path,
        frame_dir: &Path,
        _ctl: &InvocationCtl,
    ) -> MediaResult<usize> {
        if self.frame_count == 0 {
            return Err(MediaError::NoFrames(input.to_path_buf()));
        }
        let stem = input.file_stem().unwrap().to_str().unwrap();
        for i in 1..=self.frame_count {
            let name = format!("frame_{i:06}.png");
            std::fs::write(frame_dir.join(name), format!("{stem}/f{i}"))?;
        }
        Ok(self.frame_count)
    }

    async fn extract_audio(
        &self,
        input: &Path,
        audio_path: &Path,
        _ctl: &InvocationCtl,
    ) -> MediaResult<PathBuf> {
        if !self.has_audio {
            return Err(MediaError::InvalidVideo(
                "extract_audio called for a silent source".to_string(),
            ));
        }
        let stem = input.file_stem().unwrap().to_str().unwrap();
        std::fs::write(audio_path, format!("audio-of-{stem}"))?;
        Ok(audio_path.to_path_buf())
    }

    async fn compose(
        &self,
        frame_dir: &Path,
        frame_rate: f64,
        audio: Option<&Path>,
        output: &Path,
        _ctl: &InvocationCtl,
    ) -> MediaResult<()> {
        let mut manifest = format!("fps={frame_rate}\n");
        for frame in sorted_frames(frame_dir, "png")? {
            manifest.push_str(&std::fs::read_to_string(frame)?);
            manifest.push('\n');
        }
        if let Some(audio) = audio {
            manifest.push_str(&format!("audio={}\n", std::fs::read_to_string(audio)?));
        }
        std::fs::write(output, manifest)?;
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Behavior {
    /// Upscale every frame
    Upscale,
    /// Fail each batch's first attempt, leaving partial output behind
    FailOnce,
    /// Always produce one frame too few with exit code 0
    ShortOutput,
    /// Never finish until the invocation is cancelled
    HangUntilCancelled,
}

/// Upscaler fake: "upscales" by rewriting frame content with a prefix.
struct FakeUpscaler {
    behavior: Behavior,
    invocations: AtomicUsize,
    failed_batches: Mutex<HashSet<PathBuf>>,
    gate: Option<Arc<tokio::sync::Semaphore>>,
}

impl FakeUpscaler {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            invocations: AtomicUsize::new(0),
            failed_batches: Mutex::new(HashSet::new()),
            gate: None,
        }
    }

    fn gated(gate: Arc<tokio::sync::Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(Behavior::Upscale)
        }
    }

    fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    fn copy_frames(
        input_dir: &Path,
        output_dir: &Path,
        scale: ScaleFactor,
        skip_last: bool,
    ) -> MediaResult<usize> {
        let frames = sorted_frames(input_dir, "png")?;
        let take = if skip_last {
            frames.len().saturating_sub(1)
        } else {
            frames.len()
        };
        for frame in &frames[..take] {
            let content = std::fs::read_to_string(frame)?;
            let name = frame.file_name().unwrap();
            std::fs::write(
                output_dir.join(name),
                format!("up{}:{content}", scale.as_u32()),
            )?;
        }
        Ok(take)
    }
}

#[async_trait]
impl Upscaler for FakeUpscaler {
    async fn upscale_dir(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        _model: UpscaleModel,
        scale: ScaleFactor,
        ctl: &InvocationCtl,
    ) -> MediaResult<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| MediaError::Cancelled)?;
            permit.forget();
        }

        match self.behavior {
            Behavior::Upscale => {
                Self::copy_frames(input_dir, output_dir, scale, false)?;
                Ok(())
            }
            Behavior::FailOnce => {
                let first_attempt = self
                    .failed_batches
                    .lock()
                    .unwrap()
                    .insert(input_dir.to_path_buf());
                if first_attempt {
                    // Leave partial output behind to prove retries clear it
                    Self::copy_frames(input_dir, output_dir, scale, true)?;
                    Err(MediaError::tool_failed(
                        "fake-upscaler",
                        "transient failure",
                        Some("vkQueueSubmit failed".to_string()),
                        Some(1),
                    ))
                } else {
                    Self::copy_frames(input_dir, output_dir, scale, false)?;
                    Ok(())
                }
            }
            Behavior::ShortOutput => {
                Self::copy_frames(input_dir, output_dir, scale, true)?;
                Ok(())
            }
            Behavior::HangUntilCancelled => loop {
                if ctl.is_cancelled() {
                    return Err(MediaError::Cancelled);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            },
        }
    }
}

struct TestRig {
    _dirs: TempDir,
    work_root: PathBuf,
    input_dir: PathBuf,
    output_dir: PathBuf,
}

impl TestRig {
    fn new() -> Self {
        let dirs = TempDir::new().unwrap();
        let work_root = dirs.path().join("work");
        let input_dir = dirs.path().join("input");
        let output_dir = dirs.path().join("output");
        std::fs::create_dir_all(&input_dir).unwrap();
        std::fs::create_dir_all(&output_dir).unwrap();
        Self {
            _dirs: dirs,
            work_root,
            input_dir,
            output_dir,
        }
    }

    fn config(&self) -> PipelineConfig {
        PipelineConfig {
            work_root: self.work_root.clone(),
            ..PipelineConfig::default()
        }
    }

    fn video(&self, name: &str) -> PathBuf {
        let path = self.input_dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, b"container-bytes").unwrap();
        path
    }

    fn controller(
        &self,
        frame_count: usize,
        has_audio: bool,
        upscaler: Arc<FakeUpscaler>,
    ) -> JobController {
        JobController::new(
            self.config(),
            Arc::new(FakeTranscoder {
                frame_count,
                has_audio,
            }),
            upscaler,
        )
    }

    /// Workspaces left behind under the work root.
    fn leftover_workspaces(&self) -> usize {
        match std::fs::read_dir(&self.work_root) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

async fn collect_until_terminal(
    events: &mut tokio::sync::broadcast::Receiver<ProgressEvent>,
) -> Vec<ProgressEvent> {
    let mut collected = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(10), events.recv()).await {
            Ok(Ok(event)) => {
                let terminal = event.is_terminal();
                collected.push(event);
                if terminal {
                    return collected;
                }
            }
            Ok(Err(_)) | Err(_) => return collected,
        }
    }
}

async fn wait_for_state(handle: &vup_pipeline::JobHandle, state: JobState) {
    for _ in 0..500 {
        if handle.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job never reached state {state}");
}

#[tokio::test]
async fn test_end_to_end_preserves_frame_order() {
    let rig = TestRig::new();
    let video = rig.video("movie.mp4");
    let upscaler = Arc::new(FakeUpscaler::new(Behavior::Upscale));
    let controller = rig.controller(10, true, Arc::clone(&upscaler));

    // The concrete scenario: 10 frames, batch size 4 -> 3 batches
    let mut handle = controller.submit(
        UpscaleJob::new(&video, &rig.output_dir)
            .with_scale(ScaleFactor::X2)
            .with_batch_size(4),
    );
    let mut events = handle.take_events().unwrap();

    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.outputs, vec![rig.output_dir.join("upscaled_movie.mp4")]);
    assert_eq!(upscaler.invocations(), 3);

    // Frame markers come out strictly increasing, audio survives as a
    // stream copy, fps is preserved
    let manifest = std::fs::read_to_string(&outcome.outputs[0]).unwrap();
    let mut lines = manifest.lines();
    assert_eq!(lines.next().unwrap(), "fps=24");
    for i in 1..=10 {
        assert_eq!(lines.next().unwrap(), format!("up2:movie/f{i}"));
    }
    assert_eq!(lines.next().unwrap(), "audio=audio-of-movie");

    // Every stage reported start and completion, then the terminal event
    let events = collect_until_terminal(&mut events).await;
    for stage in [Stage::Decompose, Stage::Upscale, Stage::Recompose] {
        assert!(events
            .iter()
            .any(|e| matches!(e, ProgressEvent::StageStarted { stage: s } if *s == stage)));
        assert!(events
            .iter()
            .any(|e| matches!(e, ProgressEvent::StageCompleted { stage: s, .. } if *s == stage)));
    }
    assert!(matches!(
        events.last().unwrap(),
        ProgressEvent::JobSucceeded { .. }
    ));

    assert_eq!(rig.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_silent_source_skips_audio_mux() {
    let rig = TestRig::new();
    let video = rig.video("silent.mp4");
    let controller = rig.controller(5, false, Arc::new(FakeUpscaler::new(Behavior::Upscale)));

    let handle = controller.submit(UpscaleJob::new(&video, &rig.output_dir).with_batch_size(2));
    let outcome = handle.wait().await.unwrap();

    let manifest = std::fs::read_to_string(&outcome.outputs[0]).unwrap();
    assert!(!manifest.contains("audio="));
    assert_eq!(rig.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_transient_batch_failure_is_retried_and_idempotent() {
    let rig = TestRig::new();

    let clean = {
        let video = rig.video("clean.mp4");
        let upscaler = Arc::new(FakeUpscaler::new(Behavior::Upscale));
        let controller = rig.controller(10, true, Arc::clone(&upscaler));
        let handle =
            controller.submit(UpscaleJob::new(&video, &rig.output_dir).with_batch_size(4));
        let outcome = handle.wait().await.unwrap();
        assert_eq!(upscaler.invocations(), 3);
        std::fs::read_to_string(&outcome.outputs[0]).unwrap()
    };

    let retried = {
        let video = rig.video("retried.mp4");
        let upscaler = Arc::new(FakeUpscaler::new(Behavior::FailOnce));
        let controller = rig.controller(10, true, Arc::clone(&upscaler));
        let handle =
            controller.submit(UpscaleJob::new(&video, &rig.output_dir).with_batch_size(4));
        let outcome = handle.wait().await.unwrap();
        // Each of the 3 batches fails once then succeeds
        assert_eq!(upscaler.invocations(), 6);
        std::fs::read_to_string(&outcome.outputs[0]).unwrap()
    };

    // The merged frame set is identical to a first-try run (modulo the
    // source marker)
    assert_eq!(
        clean.replace("clean/", ""),
        retried.replace("retried/", "")
    );
    assert_eq!(rig.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_short_output_exhausts_retries_and_fails_job() {
    let rig = TestRig::new();
    let video = rig.video("movie.mp4");
    let upscaler = Arc::new(FakeUpscaler::new(Behavior::ShortOutput));
    let controller = rig.controller(6, true, Arc::clone(&upscaler));

    let mut handle =
        controller.submit(UpscaleJob::new(&video, &rig.output_dir).with_batch_size(6));
    let mut events = handle.take_events().unwrap();

    let err = handle.wait().await.unwrap_err();
    assert_eq!(err.kind(), "upscale");
    // Initial attempt + the default 2 retries
    assert_eq!(upscaler.invocations(), 3);

    let events = collect_until_terminal(&mut events).await;
    assert!(matches!(
        events.last().unwrap(),
        ProgressEvent::JobFailed { kind, .. } if kind == "upscale"
    ));

    // A failed job never delivers a partial output file
    assert!(!rig.output_dir.join("upscaled_movie.mp4").exists());
    assert_eq!(rig.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_cancellation_mid_upscale() {
    let rig = TestRig::new();
    let video = rig.video("movie.mp4");
    let controller = rig.controller(
        8,
        true,
        Arc::new(FakeUpscaler::new(Behavior::HangUntilCancelled)),
    );

    let mut handle =
        controller.submit(UpscaleJob::new(&video, &rig.output_dir).with_batch_size(4));
    let mut events = handle.take_events().unwrap();

    wait_for_state(&handle, JobState::Upscaling).await;
    handle.cancel();

    let err = handle.wait().await.unwrap_err();
    assert!(err.is_cancelled());

    let events = collect_until_terminal(&mut events).await;
    assert!(matches!(
        events.last().unwrap(),
        ProgressEvent::JobCancelled {}
    ));

    assert!(!rig.output_dir.join("upscaled_movie.mp4").exists());
    assert_eq!(rig.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_cancelled_terminal_state_is_not_failed() {
    let rig = TestRig::new();
    let video = rig.video("movie.mp4");
    let controller = rig.controller(
        4,
        false,
        Arc::new(FakeUpscaler::new(Behavior::HangUntilCancelled)),
    );

    let handle = controller.submit(UpscaleJob::new(&video, &rig.output_dir).with_batch_size(4));
    wait_for_state(&handle, JobState::Upscaling).await;
    handle.cancel();
    wait_for_state(&handle, JobState::Cancelled).await;
    assert_eq!(handle.state(), JobState::Cancelled);
    let _ = handle.wait().await;
}

#[tokio::test]
async fn test_bulk_mode_mirrors_directory_layout() {
    let rig = TestRig::new();
    rig.video("a.mp4");
    rig.video("season1/ep1.mkv");
    std::fs::write(rig.input_dir.join("notes.txt"), b"not a video").unwrap();

    let controller = rig.controller(3, true, Arc::new(FakeUpscaler::new(Behavior::Upscale)));
    let handle = controller.submit(
        UpscaleJob::new(&rig.input_dir, &rig.output_dir).with_batch_size(2),
    );
    let outcome = handle.wait().await.unwrap();

    assert_eq!(outcome.outputs.len(), 2);
    assert!(rig.output_dir.join("upscaled_a.mp4").is_file());
    assert!(rig
        .output_dir
        .join("season1")
        .join("upscaled_ep1.mp4")
        .is_file());
    assert_eq!(rig.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_bulk_mode_without_videos_fails() {
    let rig = TestRig::new();
    let controller = rig.controller(3, true, Arc::new(FakeUpscaler::new(Behavior::Upscale)));

    let handle = controller.submit(UpscaleJob::new(&rig.input_dir, &rig.output_dir));
    let err = handle.wait().await.unwrap_err();
    assert_eq!(err.kind(), "decompose");
}

#[tokio::test]
async fn test_unreadable_input_fails() {
    let rig = TestRig::new();
    let controller = rig.controller(3, true, Arc::new(FakeUpscaler::new(Behavior::Upscale)));

    let handle = controller.submit(UpscaleJob::new(
        rig.input_dir.join("missing.mp4"),
        &rig.output_dir,
    ));
    let err = handle.wait().await.unwrap_err();
    assert_eq!(err.kind(), "decompose");
}

#[tokio::test]
async fn test_second_job_queues_behind_first() {
    let rig = TestRig::new();
    let video_a = rig.video("a.mp4");
    let video_b = rig.video("b.mp4");

    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let controller = rig.controller(2, false, Arc::new(FakeUpscaler::gated(Arc::clone(&gate))));

    let first = controller.submit(UpscaleJob::new(&video_a, &rig.output_dir).with_batch_size(2));
    wait_for_state(&first, JobState::Upscaling).await;

    // With max_concurrent_jobs = 1, the second submission must not start
    let second = controller.submit(UpscaleJob::new(&video_b, &rig.output_dir).with_batch_size(2));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(second.state(), JobState::Queued);

    gate.add_permits(16);
    first.wait().await.unwrap();
    second.wait().await.unwrap();
    assert_eq!(rig.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_cancel_while_queued() {
    let rig = TestRig::new();
    let video_a = rig.video("a.mp4");
    let video_b = rig.video("b.mp4");

    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let controller = rig.controller(2, false, Arc::new(FakeUpscaler::gated(Arc::clone(&gate))));

    let first = controller.submit(UpscaleJob::new(&video_a, &rig.output_dir).with_batch_size(2));
    wait_for_state(&first, JobState::Upscaling).await;

    let second = controller.submit(UpscaleJob::new(&video_b, &rig.output_dir).with_batch_size(2));
    second.cancel();
    let err = second.wait().await.unwrap_err();
    assert!(err.is_cancelled());

    gate.add_permits(16);
    first.wait().await.unwrap();
}

#[tokio::test]
async fn test_workspace_collision_aborts_before_external_work() {
    let rig = TestRig::new();
    let video = rig.video("movie.mp4");
    let upscaler = Arc::new(FakeUpscaler::new(Behavior::Upscale));
    let controller = rig.controller(3, true, Arc::clone(&upscaler));

    let job = UpscaleJob::new(&video, &rig.output_dir);
    // Occupy the workspace path this job would use
    let colliding = rig.work_root.join(format!("job-{}", job.job_id));
    std::fs::create_dir_all(&colliding).unwrap();

    let handle = controller.submit(job);
    let err = handle.wait().await.unwrap_err();
    assert_eq!(err.kind(), "workspace");
    assert_eq!(upscaler.invocations(), 0);
}
