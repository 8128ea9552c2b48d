use std::path::PathBuf;
use std::time::Duration;

// --- Retry & Pacing Configuration ---

/// Retry budgets and fixed delays for one capture session.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per media segment before it is abandoned
    pub segment_attempts: u32,
    /// Delay between segment download attempts
    pub segment_retry_delay: Duration,
    /// Consecutive manifest-cycle failures tolerated before the broadcast
    /// is treated as ended
    pub manifest_retries: u32,
    /// Delay after a failed manifest cycle
    pub manifest_retry_delay: Duration,
    /// Total encoder attempts before the transcode is abandoned
    pub transcode_attempts: u32,
    /// Delay between encoder attempts
    pub transcode_retry_delay: Duration,
    /// Interval between live media-manifest polls
    pub poll_interval: Duration,
    /// Delay between master-manifest refetches while no variant matches
    pub variant_retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            segment_attempts: 10,
            segment_retry_delay: Duration::from_secs(1),
            manifest_retries: 10,
            manifest_retry_delay: Duration::from_secs(1),
            transcode_attempts: 16,
            transcode_retry_delay: Duration::from_secs(1),
            poll_interval: Duration::from_secs(2),
            variant_retry_delay: Duration::from_secs(2),
        }
    }
}

// --- Session Configuration ---

/// Everything one capture session needs: channel identity, application
/// credentials, filesystem roots, the encoder binary, and retry knobs.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Channel login to capture
    pub channel: String,
    /// GQL application client id
    pub client_id: String,
    /// OAuth token for the `Authorization` header
    pub auth_token: String,
    /// Root directory holding `Parts/` and `Output/`
    pub root_dir: PathBuf,
    /// Encoder binary invoked for the final remux
    pub ffmpeg_path: String,
    /// Optional artifact label; defaults to the channel login
    pub label: Option<String>,
    pub retry: RetryConfig,
}

impl CaptureConfig {
    pub fn new(
        channel: impl Into<String>,
        client_id: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            client_id: client_id.into(),
            auth_token: auth_token.into(),
            root_dir: PathBuf::from("Downloader"),
            ffmpeg_path: default_ffmpeg_path(),
            label: None,
            retry: RetryConfig::default(),
        }
    }

    /// Parent directory of per-session working directories.
    pub fn parts_dir(&self) -> PathBuf {
        self.root_dir.join("Parts")
    }

    /// Directory receiving the final deliverable.
    pub fn output_dir(&self) -> PathBuf {
        self.root_dir.join("Output")
    }
}

/// Encoder binary location, overridable through the `FFMPEG_PATH`
/// environment variable.
pub fn default_ffmpeg_path() -> String {
    std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string())
}
