use std::time::Duration;

use m3u8_rs::{AlternativeMediaType, MasterPlaylist, Playlist, VariantStream};
use rand::RngExt;
use tokio::time::sleep;
use tracing::{info, warn};
use url::Url;

use crate::auth::AccessCredential;
use crate::error::{CaptureError, Result};
use crate::fetch::MediaFetcher;

const USHER_URL: &str = "https://usher.ttvnw.net/api/channel/hls";
const SOURCE_QUALITY_MARK: &str = "(source)";

/// Builds an authenticated master-manifest URL. The cache-busting `p`
/// value is drawn fresh on every call.
fn master_manifest_url(login: &str, credential: &AccessCredential) -> Result<Url> {
    let mut url = Url::parse(&format!("{USHER_URL}/{login}.m3u8"))
        .map_err(|e| CaptureError::parse(format!("bad master manifest URL for {login}: {e}")))?;
    let p: u32 = rand::rng().random_range(200_000..800_000);
    url.query_pairs_mut()
        .append_pair("acmb", "e30=")
        .append_pair("allow_source", "true")
        .append_pair("allow_audio_only", "true")
        .append_pair("p", &p.to_string())
        .append_pair("player_backend", "mediaplayer")
        .append_pair("playlist_include_framerate", "true")
        .append_pair("reassignments_supported", "true")
        .append_pair("sig", &credential.signature)
        .append_pair("supported_codecs", "avc1")
        .append_pair("token", &credential.token)
        .append_pair("cdm", "cdm")
        .append_pair("player_version", "1.17.0");
    Ok(url)
}

/// Picks the rung to capture: the 1920x1080 variant when present anywhere
/// in the manifest, otherwise the rung whose video rendition is named as
/// the origin's source quality.
fn select_variant(master: &MasterPlaylist) -> Option<&VariantStream> {
    if let Some(variant) = master
        .variants
        .iter()
        .find(|v| v.resolution.is_some_and(|r| r.width == 1920 && r.height == 1080))
    {
        info!("1080p variant found");
        return Some(variant);
    }

    let source_group = master.alternatives.iter().find(|alt| {
        matches!(alt.media_type, AlternativeMediaType::Video)
            && alt.name.contains(SOURCE_QUALITY_MARK)
    })?;
    let variant = master
        .variants
        .iter()
        .find(|v| v.video.as_deref() == Some(source_group.group_id.as_str()))?;
    warn!("broadcast is not available in 1080p, capturing the source rung");
    Some(variant)
}

/// Fetches the master manifest until a usable variant shows up, then
/// returns that variant's media-manifest URL.
///
/// No retry bound: while the broadcast is starting the manifest is expected
/// to appear or enrich itself, so an unmatched fetch just sleeps
/// `retry_delay` and tries again with a rebuilt query. A master manifest
/// that does not parse is fatal and propagates without retry.
pub async fn resolve_variant(
    fetcher: &dyn MediaFetcher,
    channel: &str,
    credential: &AccessCredential,
    retry_delay: Duration,
) -> Result<String> {
    let login = channel.to_lowercase();

    loop {
        let url = master_manifest_url(&login, credential)?;
        let text = fetcher.fetch_text(url.as_str()).await?;

        let master = match m3u8_rs::parse_playlist_res(text.as_bytes()) {
            Ok(Playlist::MasterPlaylist(master)) => master,
            Ok(Playlist::MediaPlaylist(_)) => {
                return Err(CaptureError::parse(
                    "expected a master manifest, got a media manifest",
                ));
            }
            Err(e) => {
                return Err(CaptureError::parse(format!(
                    "master manifest unreadable: {e}"
                )));
            }
        };

        if let Some(variant) = select_variant(&master) {
            let media_url = url.join(&variant.uri).map_err(|e| {
                CaptureError::parse(format!("bad variant URI {}: {e}", variant.uri))
            })?;
            return Ok(media_url.into());
        }

        warn!(
            "no usable variant in the master manifest yet, refetching in {:?}",
            retry_delay
        );
        sleep(retry_delay).await;
    }
}
