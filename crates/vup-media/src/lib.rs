//! External tool wrappers for the vup upscaling pipeline.
//!
//! This crate provides:
//! - A subprocess invocation protocol shared by every external tool
//!   (streamed stderr, cancellation, timeouts, captured diagnostics)
//! - FFprobe metadata probing
//! - The `Transcoder` capability (frame/audio extraction, final encode+mux)
//!   implemented over the ffmpeg CLI
//! - The `Upscaler` capability implemented over `realesrgan-ncnn-vulkan`
//!
//! Both capabilities are traits so the orchestration layer can run against
//! substitute implementations.

pub mod command;
pub mod error;
pub mod fs_utils;
pub mod probe;
pub mod transcode;
pub mod upscale;

pub use command::{check_tool, InvocationCtl, ToolCommand, ToolRunner};
pub use error::{MediaError, MediaResult};
pub use fs_utils::{atomic_publish, count_files_with_ext, move_file, sorted_frames};
pub use probe::{probe_video, VideoInfo};
pub use transcode::{frame_file_name, FfmpegTranscoder, Transcoder, FRAME_EXT, FRAME_PATTERN};
pub use upscale::{RealesrganUpscaler, Upscaler};
