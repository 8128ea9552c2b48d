use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// One media segment observed in a manifest window. Created at admission
/// time and never mutated, whether or not its download later succeeds.
#[derive(Debug, Clone)]
pub struct MediaSegment {
    pub sequence: u32,
    pub duration_secs: f64,
    pub remote_uri: String,
    pub local_path: PathBuf,
}

/// Session-scoped record of every segment URI observed so far.
///
/// Admission is the dedup point: a URI admitted once is never admitted
/// again, so overlapping manifest windows cannot schedule a second download.
#[derive(Debug, Default)]
pub struct SegmentLedger {
    segments: Vec<MediaSegment>,
    seen: HashSet<String>,
}

impl SegmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a `(duration, uri)` candidate, assigning the next unused
    /// sequence number and a zero-padded local path under `working_dir`.
    /// Returns `None` when the URI was already seen in this session.
    pub fn admit(
        &mut self,
        duration_secs: f64,
        uri: &str,
        working_dir: &Path,
    ) -> Option<MediaSegment> {
        if !self.seen.insert(uri.to_string()) {
            return None;
        }
        let sequence = self.segments.len() as u32;
        let segment = MediaSegment {
            sequence,
            duration_secs,
            remote_uri: uri.to_string(),
            local_path: working_dir.join(segment_file_name(sequence)),
        };
        self.segments.push(segment.clone());
        Some(segment)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[MediaSegment] {
        &self.segments
    }
}

/// Zero-padded segment file name; lexical order equals numeric order for
/// any sequence below 10^8.
pub fn segment_file_name(sequence: u32) -> String {
    format!("{sequence:08}.ts")
}
