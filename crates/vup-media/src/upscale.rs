//! The neural upscaling capability.
//!
//! Invoked as a black-box batch transform over an input frame directory:
//! success is exit code 0, and the batch driver verifies output completeness
//! separately.

use std::path::Path;

use async_trait::async_trait;

use vup_models::{ScaleFactor, UpscaleModel};

use crate::command::{check_tool, InvocationCtl, ToolCommand, ToolRunner};
use crate::error::MediaResult;

/// Name of the external upscaler binary.
pub const UPSCALER_BIN: &str = "realesrgan-ncnn-vulkan";

/// Batch frame upscaling.
#[async_trait]
pub trait Upscaler: Send + Sync {
    /// Upscale every frame in `input_dir` into `output_dir` with the given
    /// model and scale factor.
    async fn upscale_dir(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        model: UpscaleModel,
        scale: ScaleFactor,
        ctl: &InvocationCtl,
    ) -> MediaResult<()>;
}

/// [`Upscaler`] implementation over the `realesrgan-ncnn-vulkan` CLI.
#[derive(Debug, Clone)]
pub struct RealesrganUpscaler;

impl RealesrganUpscaler {
    pub fn new() -> MediaResult<Self> {
        check_tool(UPSCALER_BIN)?;
        Ok(Self)
    }

    fn upscale_cmd(
        input_dir: &Path,
        output_dir: &Path,
        model: UpscaleModel,
        scale: ScaleFactor,
    ) -> ToolCommand {
        ToolCommand::new(UPSCALER_BIN)
            .arg("-i")
            .path_arg(input_dir)
            .arg("-o")
            .path_arg(output_dir)
            .arg("-s")
            .arg(scale.as_u32().to_string())
            .arg("-n")
            .arg(model.as_str())
    }
}

#[async_trait]
impl Upscaler for RealesrganUpscaler {
    async fn upscale_dir(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        model: UpscaleModel,
        scale: ScaleFactor,
        ctl: &InvocationCtl,
    ) -> MediaResult<()> {
        let cmd = Self::upscale_cmd(input_dir, output_dir, model, scale);
        ToolRunner::new(ctl.clone()).run(&cmd).await
    }
}
