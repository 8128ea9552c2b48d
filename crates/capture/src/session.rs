use std::path::PathBuf;

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::assemble::assemble_container;
use crate::auth::resolve_credential;
use crate::config::CaptureConfig;
use crate::error::Result;
use crate::fetch::HttpFetcher;
use crate::ledger::SegmentLedger;
use crate::poller::poll_until_ended;
use crate::transcode::run_transcode;
use crate::variant::resolve_variant;

/// Filesystem identity of one capture run plus the ledger of every segment
/// it observed.
#[derive(Debug)]
pub struct CaptureSession {
    pub working_dir: PathBuf,
    pub container_path: PathBuf,
    pub output_path: PathBuf,
    pub ledger: SegmentLedger,
}

impl CaptureSession {
    /// Creates the session directories and artifact paths for a capture
    /// starting now. The working directory is named after the start
    /// timestamp, so two sessions never share one.
    pub async fn prepare(config: &CaptureConfig) -> Result<Self> {
        Self::prepare_at(config, Local::now()).await
    }

    async fn prepare_at(config: &CaptureConfig, started: DateTime<Local>) -> Result<Self> {
        let stamp = started.format("%Y.%m.%d %H.%M.%S").to_string();
        let date = started.format("%d.%m.%Y %H.%M.%S").to_string();
        let label = sanitize_label(config.label.as_deref().unwrap_or(&config.channel));

        let working_dir = config.parts_dir().join(&stamp);
        let output_dir = config.output_dir();
        tokio::fs::create_dir_all(&working_dir).await?;
        tokio::fs::create_dir_all(&output_dir).await?;

        let container_path = working_dir.join(format!("{stamp}_{label}.ts"));
        Ok(Self {
            working_dir,
            container_path,
            output_path: output_dir.join(format!("{date} {label}.mp4")),
            ledger: SegmentLedger::new(),
        })
    }
}

/// Runs one complete capture: resolve the playback credential, pick the
/// variant, poll segments until the broadcast ends, assemble the container,
/// transcode it into the deliverable.
///
/// Setup failures (credentials, an unreadable master manifest, filesystem
/// errors) return `Err`. Degradation inside the poll loop and an exhausted
/// transcode are logged instead: the call still returns `Ok` and whatever
/// artifacts were produced stay on disk.
pub async fn run_capture(config: &CaptureConfig) -> Result<CaptureSession> {
    info!("live broadcast capture started for {}", config.channel);

    let mut session = CaptureSession::prepare(config).await?;

    let client = reqwest::Client::new();
    let credential = resolve_credential(&client, config).await?;
    let fetcher = HttpFetcher::new(client);

    let media_url = resolve_variant(
        &fetcher,
        &config.channel,
        &credential,
        config.retry.variant_retry_delay,
    )
    .await?;

    session.ledger =
        poll_until_ended(&fetcher, &config.retry, &media_url, &session.working_dir).await;

    assemble_container(&session.working_dir, &session.container_path).await?;

    let delivered = run_transcode(
        &config.ffmpeg_path,
        &session.container_path,
        &session.output_path,
        &config.retry,
    )
    .await?;

    if delivered {
        info!(
            "live broadcast capture finished, deliverable at {}",
            session.output_path.display()
        );
    } else {
        warn!(
            "live broadcast capture finished without a deliverable, artifacts remain in {}",
            session.working_dir.display()
        );
    }

    Ok(session)
}

/// Makes a user-influenced label safe to embed in artifact file names.
fn sanitize_label(input: &str) -> String {
    let invalid = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
    let cleaned: String = input
        .chars()
        .map(|c| if invalid.contains(&c) || c < ' ' { '_' } else { c })
        .collect();

    let strip = ['.', ' '];
    let cleaned = cleaned
        .trim_start_matches(|c| strip.contains(&c))
        .trim_end_matches(|c| strip.contains(&c))
        .to_string();

    if cleaned.is_empty() {
        "capture".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn fixed_start() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 8, 24, 1, 2, 3).unwrap()
    }

    #[tokio::test]
    async fn artifact_paths_follow_the_start_timestamp() {
        let root = tempfile::tempdir().unwrap();
        let mut config = CaptureConfig::new("SomeChannel", "client", "token");
        config.root_dir = root.path().to_path_buf();

        let session = CaptureSession::prepare_at(&config, fixed_start()).await.unwrap();

        let working_dir = root.path().join("Parts").join("2026.08.24 01.02.03");
        assert_eq!(session.working_dir, working_dir);
        assert_eq!(
            session.container_path,
            working_dir.join("2026.08.24 01.02.03_SomeChannel.ts")
        );
        assert_eq!(
            session.output_path,
            root.path()
                .join("Output")
                .join("24.08.2026 01.02.03 SomeChannel.mp4")
        );
        assert!(session.working_dir.is_dir());
        assert!(root.path().join("Output").is_dir());
        assert!(session.ledger.is_empty());
    }

    #[tokio::test]
    async fn label_overrides_the_channel_login_in_artifact_names() {
        let root = tempfile::tempdir().unwrap();
        let mut config = CaptureConfig::new("somechannel", "client", "token");
        config.root_dir = root.path().to_path_buf();
        config.label = Some("friday/show: finale".to_string());

        let session = CaptureSession::prepare_at(&config, fixed_start()).await.unwrap();

        assert_eq!(
            session.container_path.file_name().unwrap().to_str().unwrap(),
            "2026.08.24 01.02.03_friday_show_ finale.ts"
        );
    }

    #[test]
    fn labels_lose_unsafe_characters() {
        assert_eq!(sanitize_label("some/channel"), "some_channel");
        assert_eq!(sanitize_label("a:b*c?d"), "a_b_c_d");
        assert_eq!(sanitize_label("tab\there"), "tab_here");
    }

    #[test]
    fn labels_lose_leading_and_trailing_dots_and_spaces() {
        assert_eq!(sanitize_label("  ..show..  "), "show");
    }

    #[test]
    fn empty_labels_fall_back_to_a_default() {
        assert_eq!(sanitize_label(""), "capture");
        assert_eq!(sanitize_label(" ... "), "capture");
    }
}
