//! Final remux of the assembled container through an external encoder.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::RetryConfig;
use crate::error::{CaptureError, Result};

/// Encoder arguments for a straight stream copy of the container.
fn build_args(container_path: &Path, output_path: &Path) -> Vec<String> {
    vec![
        "-i".to_string(),
        container_path.to_string_lossy().to_string(),
        "-analyzeduration".to_string(),
        i32::MAX.to_string(),
        "-probesize".to_string(),
        i32::MAX.to_string(),
        "-fps_mode".to_string(),
        "1".to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-preset".to_string(),
        "p7".to_string(),
        "-c:a".to_string(),
        "copy".to_string(),
        output_path.to_string_lossy().to_string(),
    ]
}

/// Remuxes the container into the deliverable, retrying non-zero encoder
/// exits up to `retry.transcode_attempts` total attempts.
///
/// Returns `Ok(true)` once an attempt succeeds and `Ok(false)` when the
/// budget is exhausted; in the latter case the container and segment files
/// are left on disk and no deliverable exists. Failing to spawn or wait on
/// the encoder at all is an I/O error and propagates.
pub async fn run_transcode(
    ffmpeg_path: &str,
    container_path: &Path,
    output_path: &Path,
    retry: &RetryConfig,
) -> Result<bool> {
    info!("container transcode started");
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match run_once(ffmpeg_path, container_path, output_path).await {
            Ok(()) => {
                info!("container transcode finished");
                return Ok(true);
            }
            Err(CaptureError::Process { code }) if attempts < retry.transcode_attempts => {
                warn!("encoder exited with status {code}, retrying ({attempts} failed attempts)");
                sleep(retry.transcode_retry_delay).await;
            }
            Err(CaptureError::Process { code }) => {
                error!(
                    "abandoning the transcode after {attempts} attempts, last exit status {code}"
                );
                return Ok(false);
            }
            Err(e) => return Err(e),
        }
    }
}

async fn run_once(ffmpeg_path: &str, container_path: &Path, output_path: &Path) -> Result<()> {
    let args = build_args(container_path, output_path);
    debug!("spawning {} {}", ffmpeg_path, args.join(" "));

    let mut child = Command::new(ffmpeg_path)
        .args(&args)
        .env("LC_ALL", "C")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // The encoder reports progress on stdout as `frame=` lines; everything
    // else on that stream is noise. stderr is forwarded wholesale.
    let stdout_task = child.stdout.take().map(|stdout| {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.starts_with("frame=") {
                    debug!("{line}");
                }
            }
        })
    });
    let stderr_task = child.stderr.take().map(|stderr| {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("{line}");
            }
        })
    });

    let status = child.wait().await?;
    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    if let Some(task) = stderr_task {
        let _ = task.await;
    }

    if !status.success() {
        return Err(CaptureError::Process {
            code: status.code().unwrap_or(-1),
        });
    }
    Ok(())
}
