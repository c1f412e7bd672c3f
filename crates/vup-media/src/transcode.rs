//! The transcoding capability: video decomposition and recomposition.
//!
//! Implemented over the ffmpeg CLI. The trait seam exists so the
//! orchestration layer can substitute alternative implementations behind the
//! same contract.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::command::{check_tool, InvocationCtl, ToolCommand, ToolRunner};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::count_files_with_ext;
use crate::probe::{probe_video, VideoInfo};

/// Frame image extension used throughout the pipeline.
pub const FRAME_EXT: &str = "png";

/// FFmpeg sequence pattern for frame files.
///
/// Fixed-width zero-padded indices keep lexicographic order equal to
/// temporal order; downstream batching depends on that.
pub const FRAME_PATTERN: &str = "frame_%06d.png";

/// File name for a frame index under [`FRAME_PATTERN`] (1-based, matching
/// ffmpeg's sequence numbering).
pub fn frame_file_name(index: u64) -> String {
    format!("frame_{index:06}.{FRAME_EXT}")
}

/// Container metadata and media decomposition/recomposition.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Probe container metadata.
    async fn probe(&self, input: &Path) -> MediaResult<VideoInfo>;

    /// Extract the full frame sequence into `frame_dir` as a numbered,
    /// zero-padded image sequence at the source's native frame rate.
    /// Returns the number of frames written; zero frames is an error.
    async fn extract_frames(
        &self,
        input: &Path,
        frame_dir: &Path,
        ctl: &InvocationCtl,
    ) -> MediaResult<usize>;

    /// Extract the audio track losslessly (stream copy) to `audio_path`.
    /// Only called for sources that carry an audio stream.
    async fn extract_audio(
        &self,
        input: &Path,
        audio_path: &Path,
        ctl: &InvocationCtl,
    ) -> MediaResult<PathBuf>;

    /// Encode the frame sequence in `frame_dir` at `frame_rate` and, when
    /// present, mux `audio` back in as a stream copy. Writes to `output`;
    /// atomic placement is the caller's concern.
    async fn compose(
        &self,
        frame_dir: &Path,
        frame_rate: f64,
        audio: Option<&Path>,
        output: &Path,
        ctl: &InvocationCtl,
    ) -> MediaResult<()>;
}

/// [`Transcoder`] implementation over the ffmpeg CLI.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder;

impl FfmpegTranscoder {
    pub fn new() -> MediaResult<Self> {
        check_tool("ffmpeg")?;
        check_tool("ffprobe")?;
        Ok(Self)
    }

    fn extract_frames_cmd(input: &Path, frame_dir: &Path) -> ToolCommand {
        ToolCommand::new("ffmpeg")
            .args(["-y", "-v", "error"])
            .arg("-i")
            .path_arg(input)
            .args(["-qscale:v", "1"])
            .path_arg(frame_dir.join(FRAME_PATTERN))
    }

    fn extract_audio_cmd(input: &Path, audio_path: &Path) -> ToolCommand {
        ToolCommand::new("ffmpeg")
            .args(["-y", "-v", "error"])
            .arg("-i")
            .path_arg(input)
            .args(["-vn", "-acodec", "copy"])
            .path_arg(audio_path)
    }

    fn compose_cmd(
        frame_dir: &Path,
        frame_rate: f64,
        audio: Option<&Path>,
        output: &Path,
    ) -> ToolCommand {
        let mut cmd = ToolCommand::new("ffmpeg")
            .args(["-y", "-v", "error"])
            .arg("-framerate")
            .arg(format!("{frame_rate}"))
            .arg("-i")
            .path_arg(frame_dir.join(FRAME_PATTERN));

        if let Some(audio) = audio {
            cmd = cmd.arg("-i").path_arg(audio);
        }

        cmd = cmd.args(["-map", "0:v:0"]);
        if audio.is_some() {
            cmd = cmd.args(["-map", "1:a:0"]);
        }

        cmd = cmd.args([
            "-c:v",
            "libx264",
            "-crf",
            "18",
            "-pix_fmt",
            "yuv420p",
        ]);
        if audio.is_some() {
            cmd = cmd.args(["-c:a", "copy"]);
        }

        cmd.path_arg(output)
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe(&self, input: &Path) -> MediaResult<VideoInfo> {
        probe_video(input).await
    }

    async fn extract_frames(
        &self,
        input: &Path,
        frame_dir: &Path,
        ctl: &InvocationCtl,
    ) -> MediaResult<usize> {
        let cmd = Self::extract_frames_cmd(input, frame_dir);
        ToolRunner::new(ctl.clone()).run(&cmd).await?;

        let count = count_files_with_ext(frame_dir, FRAME_EXT)?;
        debug!("Extracted {} frames from {}", count, input.display());
        if count == 0 {
            return Err(MediaError::NoFrames(input.to_path_buf()));
        }
        Ok(count)
    }

    async fn extract_audio(
        &self,
        input: &Path,
        audio_path: &Path,
        ctl: &InvocationCtl,
    ) -> MediaResult<PathBuf> {
        let cmd = Self::extract_audio_cmd(input, audio_path);
        ToolRunner::new(ctl.clone()).run(&cmd).await?;
        Ok(audio_path.to_path_buf())
    }

    async fn compose(
        &self,
        frame_dir: &Path,
        frame_rate: f64,
        audio: Option<&Path>,
        output: &Path,
        ctl: &InvocationCtl,
    ) -> MediaResult<()> {
        let cmd = Self::compose_cmd(frame_dir, frame_rate, audio, output);
        ToolRunner::new(ctl.clone()).run(&cmd).await
    }
}
