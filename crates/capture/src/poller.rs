use std::path::Path;

use futures::future::join_all;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::RetryConfig;
use crate::error::Result;
use crate::fetch::MediaFetcher;
use crate::ledger::{MediaSegment, SegmentLedger};
use crate::manifest::parse_media_manifest;

enum CycleOutcome {
    Continue,
    Ended,
}

/// Polls the live media manifest until the broadcast ends, downloading
/// every newly published segment into `working_dir`.
///
/// The loop has exactly two exits: the manifest's own end marker, and
/// `retry.manifest_retries` consecutive failed cycles, which force an end
/// instead of failing the session. Individual segment failures never end
/// the loop; a segment that exhausts its attempts is abandoned with an
/// error log and the capture carries on without it.
pub async fn poll_until_ended(
    fetcher: &dyn MediaFetcher,
    retry: &RetryConfig,
    media_url: &str,
    working_dir: &Path,
) -> SegmentLedger {
    let mut ledger = SegmentLedger::new();
    let mut consecutive_failures: u32 = 0;

    info!("live segment download started");

    loop {
        match poll_cycle(fetcher, retry, media_url, working_dir, &mut ledger).await {
            Ok(CycleOutcome::Ended) => {
                info!("end-of-broadcast marker observed");
                break;
            }
            Ok(CycleOutcome::Continue) => {
                consecutive_failures = 0;
                sleep(retry.poll_interval).await;
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures > retry.manifest_retries {
                    error!(
                        "manifest refresh failed {consecutive_failures} times in a row, treating the broadcast as ended: {e}"
                    );
                    break;
                }
                warn!(
                    "manifest cycle failed ({consecutive_failures} of {} tolerated): {e}",
                    retry.manifest_retries
                );
                sleep(retry.manifest_retry_delay).await;
            }
        }
    }

    info!(
        "live segment download finished, {} segments observed",
        ledger.len()
    );
    ledger
}

/// One poll: fetch and parse the manifest, admit the window's unseen URIs
/// into the ledger, then download the whole batch concurrently. The cycle
/// does not return until every download has succeeded or given up.
async fn poll_cycle(
    fetcher: &dyn MediaFetcher,
    retry: &RetryConfig,
    media_url: &str,
    working_dir: &Path,
    ledger: &mut SegmentLedger,
) -> Result<CycleOutcome> {
    let text = fetcher.fetch_text(media_url).await?;
    let manifest = parse_media_manifest(&text)?;

    let batch: Vec<MediaSegment> = manifest
        .entries
        .iter()
        .filter_map(|entry| ledger.admit(entry.duration_secs, &entry.uri, working_dir))
        .collect();

    if !batch.is_empty() {
        debug!("{} new segments in this manifest window", batch.len());
    }

    let downloads = batch
        .iter()
        .map(|segment| download_segment(fetcher, retry, segment));
    join_all(downloads).await;

    if manifest.is_end {
        return Ok(CycleOutcome::Ended);
    }
    Ok(CycleOutcome::Continue)
}

/// Downloads one segment with its own retry budget.
async fn download_segment(fetcher: &dyn MediaFetcher, retry: &RetryConfig, segment: &MediaSegment) {
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match try_download(fetcher, segment).await {
            Ok(()) => {
                debug!("segment {:08} downloaded", segment.sequence);
                return;
            }
            Err(e) if attempts < retry.segment_attempts => {
                error!("segment download failed, retrying: {e}");
                sleep(retry.segment_retry_delay).await;
            }
            Err(e) => {
                error!(
                    "giving up on {} after {attempts} attempts (local file {}): {e}",
                    segment.remote_uri,
                    segment.local_path.display()
                );
                return;
            }
        }
    }
}

async fn try_download(fetcher: &dyn MediaFetcher, segment: &MediaSegment) -> Result<()> {
    let payload = fetcher.fetch_bytes(&segment.remote_uri).await?;
    tokio::fs::write(&segment.local_path, &payload).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use reqwest::StatusCode;

    use super::*;
    use crate::error::CaptureError;

    enum ManifestStep {
        Text(&'static str),
        Fail,
    }

    struct FakeOrigin {
        manifests: Mutex<VecDeque<ManifestStep>>,
        payloads: HashMap<String, Bytes>,
        transient_failures: Mutex<HashMap<String, u32>>,
        dead_uris: HashSet<String>,
        manifest_fetches: AtomicU32,
        segment_fetches: Mutex<HashMap<String, u32>>,
    }

    impl FakeOrigin {
        fn new(manifests: impl IntoIterator<Item = ManifestStep>) -> Self {
            Self {
                manifests: Mutex::new(manifests.into_iter().collect()),
                payloads: HashMap::new(),
                transient_failures: Mutex::new(HashMap::new()),
                dead_uris: HashSet::new(),
                manifest_fetches: AtomicU32::new(0),
                segment_fetches: Mutex::new(HashMap::new()),
            }
        }

        fn with_payload(mut self, uri: &str, payload: &'static [u8]) -> Self {
            self.payloads
                .insert(uri.to_string(), Bytes::from_static(payload));
            self
        }

        fn with_transient_failures(self, uri: &str, count: u32) -> Self {
            self.transient_failures
                .lock()
                .unwrap()
                .insert(uri.to_string(), count);
            self
        }

        fn with_dead_uri(mut self, uri: &str) -> Self {
            self.dead_uris.insert(uri.to_string());
            self
        }

        fn manifest_fetches(&self) -> u32 {
            self.manifest_fetches.load(Ordering::SeqCst)
        }

        fn segment_fetches(&self, uri: &str) -> u32 {
            self.segment_fetches
                .lock()
                .unwrap()
                .get(uri)
                .copied()
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl MediaFetcher for FakeOrigin {
        async fn fetch_text(&self, url: &str) -> Result<String> {
            self.manifest_fetches.fetch_add(1, Ordering::SeqCst);
            let step = self
                .manifests
                .lock()
                .unwrap()
                .pop_front()
                .expect("manifest script exhausted");
            match step {
                ManifestStep::Text(text) => Ok(text.to_string()),
                ManifestStep::Fail => Err(CaptureError::http_status(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    url,
                    "manifest fetch",
                )),
            }
        }

        async fn fetch_bytes(&self, url: &str) -> Result<Bytes> {
            *self
                .segment_fetches
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_insert(0) += 1;

            if self.dead_uris.contains(url) {
                return Err(CaptureError::http_status(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    url,
                    "segment fetch",
                ));
            }
            if let Some(left) = self.transient_failures.lock().unwrap().get_mut(url)
                && *left > 0
            {
                *left -= 1;
                return Err(CaptureError::http_status(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    url,
                    "segment fetch",
                ));
            }
            Ok(self
                .payloads
                .get(url)
                .expect("no payload scripted for URI")
                .clone())
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            segment_retry_delay: Duration::from_millis(1),
            manifest_retry_delay: Duration::from_millis(1),
            poll_interval: Duration::from_millis(1),
            ..RetryConfig::default()
        }
    }

    const WINDOW_ONE: &str = "#EXTM3U\n\
        #EXTINF:2.0,\nhttps://edge/seg0.ts\n\
        #EXTINF:2.0,\nhttps://edge/seg1.ts\n";

    const WINDOW_TWO_WITH_END: &str = "#EXTM3U\n\
        #EXTINF:2.0,\nhttps://edge/seg1.ts\n\
        #EXTINF:2.0,\nhttps://edge/seg2.ts\n\
        #EXTINF:2.0,\nhttps://edge/seg3.ts\n\
        #EXT-X-ENDLIST\n";

    #[tokio::test]
    async fn overlapping_windows_fetch_each_uri_once() {
        let dir = tempfile::tempdir().unwrap();
        let origin = FakeOrigin::new([
            ManifestStep::Text(WINDOW_ONE),
            ManifestStep::Text(WINDOW_TWO_WITH_END),
        ])
        .with_payload("https://edge/seg0.ts", b"zero")
        .with_payload("https://edge/seg1.ts", b"one")
        .with_payload("https://edge/seg2.ts", b"two")
        .with_payload("https://edge/seg3.ts", b"three");

        let ledger = poll_until_ended(&origin, &fast_retry(), "https://edge/live.m3u8", dir.path()).await;

        assert_eq!(origin.manifest_fetches(), 2);
        assert_eq!(ledger.len(), 4);
        for uri in [
            "https://edge/seg0.ts",
            "https://edge/seg1.ts",
            "https://edge/seg2.ts",
            "https://edge/seg3.ts",
        ] {
            assert_eq!(origin.segment_fetches(uri), 1, "{uri} fetched more than once");
        }
        assert_eq!(std::fs::read(dir.path().join("00000000.ts")).unwrap(), b"zero");
        assert_eq!(std::fs::read(dir.path().join("00000001.ts")).unwrap(), b"one");
        assert_eq!(std::fs::read(dir.path().join("00000002.ts")).unwrap(), b"two");
        assert_eq!(std::fs::read(dir.path().join("00000003.ts")).unwrap(), b"three");
    }

    #[tokio::test]
    async fn ending_manifest_still_downloads_its_new_segments() {
        let dir = tempfile::tempdir().unwrap();
        let origin = FakeOrigin::new([ManifestStep::Text(WINDOW_TWO_WITH_END)])
            .with_payload("https://edge/seg1.ts", b"one")
            .with_payload("https://edge/seg2.ts", b"two")
            .with_payload("https://edge/seg3.ts", b"three");

        let ledger = poll_until_ended(&origin, &fast_retry(), "https://edge/live.m3u8", dir.path()).await;

        assert_eq!(origin.manifest_fetches(), 1);
        assert_eq!(ledger.len(), 3);
        assert!(dir.path().join("00000000.ts").exists());
        assert!(dir.path().join("00000002.ts").exists());
    }

    #[tokio::test]
    async fn duplicate_uri_within_one_window_is_fetched_once() {
        let dir = tempfile::tempdir().unwrap();
        let window = "#EXTM3U\n\
            #EXTINF:2.0,\nhttps://edge/seg0.ts\n\
            #EXTINF:2.0,\nhttps://edge/seg0.ts\n\
            #EXT-X-ENDLIST\n";
        let origin = FakeOrigin::new([ManifestStep::Text(window)])
            .with_payload("https://edge/seg0.ts", b"zero");

        let ledger = poll_until_ended(&origin, &fast_retry(), "https://edge/live.m3u8", dir.path()).await;

        assert_eq!(ledger.len(), 1);
        assert_eq!(origin.segment_fetches("https://edge/seg0.ts"), 1);
    }

    #[tokio::test]
    async fn abandoned_segment_blocks_nothing_and_keeps_its_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let origin = FakeOrigin::new([ManifestStep::Text(WINDOW_ONE), ManifestStep::Text(WINDOW_TWO_WITH_END)])
            .with_dead_uri("https://edge/seg0.ts")
            .with_payload("https://edge/seg1.ts", b"one")
            .with_payload("https://edge/seg2.ts", b"two")
            .with_payload("https://edge/seg3.ts", b"three");

        let ledger = poll_until_ended(&origin, &fast_retry(), "https://edge/live.m3u8", dir.path()).await;

        // Ten total attempts, then the segment is dropped without poisoning
        // the cycle. Its sequence number and file slot stay reserved.
        assert_eq!(origin.segment_fetches("https://edge/seg0.ts"), 10);
        assert_eq!(ledger.len(), 4);
        assert!(!dir.path().join("00000000.ts").exists());
        assert_eq!(std::fs::read(dir.path().join("00000001.ts")).unwrap(), b"one");
        assert_eq!(std::fs::read(dir.path().join("00000003.ts")).unwrap(), b"three");
    }

    #[tokio::test]
    async fn transient_segment_failures_recover_within_budget() {
        let dir = tempfile::tempdir().unwrap();
        let origin = FakeOrigin::new([ManifestStep::Text(WINDOW_TWO_WITH_END)])
            .with_payload("https://edge/seg1.ts", b"one")
            .with_payload("https://edge/seg2.ts", b"two")
            .with_payload("https://edge/seg3.ts", b"three")
            .with_transient_failures("https://edge/seg2.ts", 2);

        poll_until_ended(&origin, &fast_retry(), "https://edge/live.m3u8", dir.path()).await;

        assert_eq!(origin.segment_fetches("https://edge/seg2.ts"), 3);
        assert_eq!(std::fs::read(dir.path().join("00000001.ts")).unwrap(), b"two");
    }

    #[tokio::test]
    async fn consecutive_manifest_failures_force_an_end() {
        let dir = tempfile::tempdir().unwrap();
        let origin = FakeOrigin::new((0..11).map(|_| ManifestStep::Fail));

        let ledger = poll_until_ended(&origin, &fast_retry(), "https://edge/live.m3u8", dir.path()).await;

        // Initial cycle plus ten retries, then the loop gives up.
        assert_eq!(origin.manifest_fetches(), 11);
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn manifest_failure_counter_resets_on_a_good_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut script: Vec<ManifestStep> = (0..10).map(|_| ManifestStep::Fail).collect();
        script.push(ManifestStep::Text(WINDOW_ONE));
        script.extend((0..10).map(|_| ManifestStep::Fail));
        script.push(ManifestStep::Text(WINDOW_TWO_WITH_END));

        let origin = FakeOrigin::new(script)
            .with_payload("https://edge/seg0.ts", b"zero")
            .with_payload("https://edge/seg1.ts", b"one")
            .with_payload("https://edge/seg2.ts", b"two")
            .with_payload("https://edge/seg3.ts", b"three");

        let ledger = poll_until_ended(&origin, &fast_retry(), "https://edge/live.m3u8", dir.path()).await;

        // Both failure runs stay within budget because the good cycle in
        // between resets the consecutive counter.
        assert_eq!(origin.manifest_fetches(), 22);
        assert_eq!(ledger.len(), 4);
    }

    #[tokio::test]
    async fn unparseable_manifest_counts_as_a_failed_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let origin = FakeOrigin::new([
            ManifestStep::Text("#EXTM3U\n#EXTINF:bogus,\nseg.ts\n"),
            ManifestStep::Text(WINDOW_TWO_WITH_END),
        ])
        .with_payload("https://edge/seg1.ts", b"one")
        .with_payload("https://edge/seg2.ts", b"two")
        .with_payload("https://edge/seg3.ts", b"three");

        let ledger = poll_until_ended(&origin, &fast_retry(), "https://edge/live.m3u8", dir.path()).await;

        assert_eq!(origin.manifest_fetches(), 2);
        assert_eq!(ledger.len(), 3);
    }
}
