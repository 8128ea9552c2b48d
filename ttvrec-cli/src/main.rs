use std::path::PathBuf;
use std::process;

use capture_engine::{CaptureConfig, default_ffmpeg_path, run_capture};
use clap::Parser;
use tracing::{Level, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Capture a live Twitch broadcast into a single MP4.
///
/// Blocks until the broadcast ends, then assembles the downloaded segments
/// and remuxes them with ffmpeg. Artifacts land under the root directory:
/// per-session segment files in `Parts/`, the deliverable in `Output/`.
#[derive(Debug, Parser)]
#[command(name = "ttvrec", version, about)]
struct Args {
    /// Channel login to capture
    channel: String,

    /// Twitch GQL application client id
    #[arg(long, env = "TTVREC_CLIENT_ID")]
    client_id: String,

    /// OAuth token for the Authorization header
    #[arg(long, env = "TTVREC_AUTH_TOKEN", hide_env_values = true)]
    auth_token: String,

    /// Root directory holding Parts/ and Output/
    #[arg(long, default_value = "Downloader")]
    root_dir: PathBuf,

    /// ffmpeg binary used for the final remux
    #[arg(long, env = "FFMPEG_PATH")]
    ffmpeg: Option<String>,

    /// Artifact label; defaults to the channel login
    #[arg(long)]
    label: Option<String>,

    /// Show per-segment and encoder output
    #[arg(short, long)]
    verbose: bool,

    /// Only report errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let mut config = CaptureConfig::new(&args.channel, &args.client_id, &args.auth_token);
    config.root_dir = args.root_dir;
    config.ffmpeg_path = args.ffmpeg.unwrap_or_else(default_ffmpeg_path);
    config.label = args.label;

    if let Err(e) = run_capture(&config).await {
        error!("capture failed: {e}");
        process::exit(1);
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_level(verbose))
        .init();
}
