//! Filesystem utilities for frame directories and atomic output placement.

use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Count regular files in `dir` with the given extension.
pub fn count_files_with_ext(dir: &Path, ext: &str) -> MediaResult<usize> {
    if !dir.is_dir() {
        return Err(MediaError::FileNotFound(dir.to_path_buf()));
    }
    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(ext) {
            count += 1;
        }
    }
    Ok(count)
}

/// Collect frame files in `dir` sorted lexicographically.
///
/// With the fixed-width numbering scheme this is temporal order.
pub fn sorted_frames(dir: &Path, ext: &str) -> MediaResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(MediaError::FileNotFound(dir.to_path_buf()));
    }
    let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(ext)
        })
        .collect();
    frames.sort();
    Ok(frames)
}

/// Move a file from `src` to `dst`, handling cross-device moves.
///
/// Attempts a fast rename first; on EXDEV falls back to copying to a
/// temporary name on the destination filesystem and renaming into place.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device rename, falling back to copy+delete: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Check if an IO error is EXDEV (cross-device link).
fn is_cross_device_error(e: &std::io::Error) -> bool {
    // EXDEV is error code 18 on Linux/macOS
    e.raw_os_error() == Some(18)
}

/// Copy file to destination (via temp name) then delete source.
async fn copy_and_delete(src: &Path, dst: &Path) -> MediaResult<()> {
    let tmp_dst = dst.with_extension("tmp");

    fs::copy(src, &tmp_dst).await?;

    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        let _ = std::fs::remove_file(&tmp_dst);
        return Err(MediaError::from(e));
    }

    if let Err(e) = fs::remove_file(src).await {
        tracing::warn!(
            "Failed to remove source after cross-device move: {}: {}",
            src.display(),
            e
        );
    }

    Ok(())
}

/// Publish `staging` to `final_path` atomically from the caller's
/// perspective: the advertised path either holds the complete file or
/// nothing. Refuses to overwrite an existing file at `final_path`.
pub async fn atomic_publish(staging: impl AsRef<Path>, final_path: impl AsRef<Path>) -> MediaResult<()> {
    let staging = staging.as_ref();
    let final_path = final_path.as_ref();

    if final_path.exists() {
        return Err(MediaError::tool_failed(
            "publish",
            format!("output path already exists: {}", final_path.display()),
            None,
            None,
        ));
    }
    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    move_file(staging, final_path).await
}
