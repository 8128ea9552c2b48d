// Live Twitch broadcast capture: credential resolution, variant selection,
// segment polling, container assembly, and the final remux.
pub mod assemble;
pub mod auth;
pub mod config;
pub mod error;
pub mod fetch;
pub mod ledger;
pub mod manifest;
pub mod poller;
pub mod session;
pub mod transcode;
pub mod variant;

// Export common types for ease of use
pub use auth::{AccessCredential, resolve_credential};
pub use config::{CaptureConfig, RetryConfig, default_ffmpeg_path};
pub use error::{CaptureError, Result};
pub use fetch::{HttpFetcher, MediaFetcher};
pub use ledger::{MediaSegment, SegmentLedger};
pub use session::{CaptureSession, run_capture};
