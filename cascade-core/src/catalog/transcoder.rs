//! Transcoder abstraction used to synthesize missing renditions.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;

use super::{CatalogError, CatalogResult};
use crate::policy::PixelDimensions;

/// Abstraction over the external transcode tool so catalog builds can run
/// against a real ffmpeg binary or an in-process fake.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Re-encodes `input_path` at `dimensions` into `output_path`.
    ///
    /// The output container is inferred from the output extension.
    ///
    /// # Errors
    ///
    /// - `CatalogError::SynthesisFailed` - Tool could not be launched, exited non-zero or produced no output
    async fn transcode(
        &self,
        input_path: &Path,
        output_path: &Path,
        dimensions: PixelDimensions,
    ) -> CatalogResult<TranscodeReport>;
}

/// Outcome of one successful synthesis.
#[derive(Debug, Clone)]
pub struct TranscodeReport {
    /// Size of the written file in bytes
    pub output_size: u64,
    /// Wall-clock processing time in seconds
    pub processing_time: f64,
}

/// Transcoder that shells out to an ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegTranscoder {
    /// Creates a transcoder using the given binary (looked up on `PATH` if relative).
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// Checks whether the binary answers `-version`.
    pub async fn is_available(&self) -> bool {
        tokio::process::Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input_path: &Path,
        output_path: &Path,
        dimensions: PixelDimensions,
    ) -> CatalogResult<TranscodeReport> {
        let start_time = Instant::now();

        let mut cmd = tokio::process::Command::new(&self.ffmpeg_path);
        cmd.arg("-y")
            .arg("-i")
            .arg(input_path)
            .arg("-s")
            .arg(dimensions.as_size_arg())
            .arg(output_path)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        tracing::debug!("Executing transcode command: {:?}", cmd);

        let output = cmd.output().await.map_err(|e| CatalogError::SynthesisFailed {
            output: output_path.to_path_buf(),
            reason: format!("failed to execute {}: {e}", self.ffmpeg_path.display()),
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            tracing::trace!("Transcoder stderr for {}: {}", output_path.display(), stderr);
        }

        if !output.status.success() {
            discard_partial_output(output_path).await;
            return Err(CatalogError::SynthesisFailed {
                output: output_path.to_path_buf(),
                reason: format!("exit status {}: {}", output.status, last_line(&stderr)),
            });
        }

        let output_size = match tokio::fs::metadata(output_path).await {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                discard_partial_output(output_path).await;
                return Err(CatalogError::SynthesisFailed {
                    output: output_path.to_path_buf(),
                    reason: format!("output missing after transcode: {e}"),
                });
            }
        };

        Ok(TranscodeReport {
            output_size,
            processing_time: start_time.elapsed().as_secs_f64(),
        })
    }
}

/// Removes whatever a failed run left at `output_path` so the next scan
/// does not mistake it for a finished rendition.
async fn discard_partial_output(output_path: &Path) {
    match tokio::fs::remove_file(output_path).await {
        Ok(()) => tracing::debug!("Removed partial output {}", output_path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            "Failed to remove partial output {}: {}",
            output_path.display(),
            e
        ),
    }
}

/// Last non-empty line of tool output, which is where ffmpeg reports the fatal error.
fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_missing_binary_reports_synthesis_failure() {
        let temp_dir = tempdir().unwrap();
        let input_path = temp_dir.path().join("demo-720p.mp4");
        let output_path = temp_dir.path().join("demo-240p.mp4");
        std::fs::write(&input_path, b"not really a video").unwrap();

        let transcoder = FfmpegTranscoder::new("/nonexistent/cascade-ffmpeg");
        let result = transcoder
            .transcode(
                &input_path,
                &output_path,
                PixelDimensions {
                    width: 426,
                    height: 240,
                },
            )
            .await;

        assert!(matches!(result, Err(CatalogError::SynthesisFailed { .. })));
        assert!(!transcoder.is_available().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_transcode_removes_partial_output() {
        use std::os::unix::fs::PermissionsExt;

        use crate::catalog::RenditionCatalog;

        let temp_dir = tempdir().unwrap();
        let tool_dir = tempdir().unwrap();
        let input_path = temp_dir.path().join("demo-720p.mp4");
        let output_path = temp_dir.path().join("demo-240p.avi");
        std::fs::write(&input_path, b"not really a video").unwrap();

        // Writes to its last argument and then fails, like an interrupted encode.
        let tool = tool_dir.path().join("failing-ffmpeg");
        std::fs::write(
            &tool,
            "#!/bin/sh\nfor last; do :; done\necho partial > \"$last\"\necho 'conversion failed' >&2\nexit 1\n",
        )
        .unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let result = FfmpegTranscoder::new(&tool)
            .transcode(
                &input_path,
                &output_path,
                PixelDimensions {
                    width: 426,
                    height: 240,
                },
            )
            .await;

        match result {
            Err(CatalogError::SynthesisFailed { output, reason }) => {
                assert_eq!(output, output_path);
                assert!(reason.contains("conversion failed"));
            }
            other => panic!("expected a synthesis failure, got {other:?}"),
        }
        assert!(!output_path.exists());

        let catalog = RenditionCatalog::scan_only(temp_dir.path()).await.unwrap();
        assert!(catalog.lookup("demo-240p.avi").is_none());
        assert!(catalog.lookup("demo-720p.mp4").is_some());
    }

    #[tokio::test]
    async fn test_discard_partial_output_ignores_missing_file() {
        let temp_dir = tempdir().unwrap();
        discard_partial_output(&temp_dir.path().join("never-written.mp4")).await;
    }

    #[test]
    fn test_last_line_skips_trailing_blank_lines() {
        assert_eq!(last_line("a\nfatal: bad input\n\n"), "fatal: bad input");
        assert_eq!(last_line(""), "");
    }
}
