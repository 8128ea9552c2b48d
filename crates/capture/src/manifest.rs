use crate::error::{CaptureError, Result};

const EXTINF_TAG: &str = "#EXTINF:";
const ENDLIST_TAG: &str = "#EXT-X-ENDLIST";

/// One `(duration, uri)` pair discovered in a media manifest window.
/// Dedup against previously seen URIs happens in the ledger, not here.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEntry {
    pub duration_secs: f64,
    pub uri: String,
}

/// Parsed view of one media-manifest fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaManifest {
    pub entries: Vec<SegmentEntry>,
    pub is_end: bool,
}

/// Parses a live media manifest line by line.
///
/// A line starting with `#EXT-X-ENDLIST` flips the end flag. A line starting
/// with `#EXTINF:` yields a duration (text after the last `:`, with any
/// `,live` suffix removed and a trailing `,` trimmed, clamped to >= 0) paired
/// with the following line as the segment URI, taken verbatim. Anything that
/// breaks this shape is a parse error; callers fold it into their own retry.
pub fn parse_media_manifest(text: &str) -> Result<MediaManifest> {
    let lines: Vec<&str> = text.split('\n').map(str::trim).collect();

    let mut entries = Vec::new();
    let mut is_end = false;

    for (index, line) in lines.iter().enumerate() {
        if line.starts_with(ENDLIST_TAG) {
            is_end = true;
        }
        if !line.starts_with(EXTINF_TAG) {
            continue;
        }
        let duration_secs = parse_extinf_duration(line)?;
        let uri = lines
            .get(index + 1)
            .ok_or_else(|| CaptureError::parse("#EXTINF line with no following URI"))?
            .to_string();
        entries.push(SegmentEntry { duration_secs, uri });
    }

    Ok(MediaManifest { entries, is_end })
}

fn parse_extinf_duration(line: &str) -> Result<f64> {
    let cleaned = line.replace(",live", "");
    let (_, raw) = cleaned
        .rsplit_once(':')
        .ok_or_else(|| CaptureError::parse(format!("malformed duration tag: {line}")))?;
    let duration: f64 = raw
        .trim_end_matches(',')
        .parse()
        .map_err(|_| CaptureError::parse(format!("unreadable segment duration: {line}")))?;
    Ok(duration.max(0.0))
}
