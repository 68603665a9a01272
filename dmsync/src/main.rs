//! `dmsync` — replay a capture of push events through the sync engine.
//!
//! Prints the converged timeline and the acknowledgements the engine sent.
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/dmsync/config.toml`).
//!
//! ```bash
//! cargo run --bin dmsync -- capture.jsonl --me alice --partner bob
//!
//! # Or via environment variables
//! DMSYNC_ME=alice DMSYNC_PARTNER=bob cargo run --bin dmsync -- capture.jsonl
//! ```

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use dmsync::config::{CliArgs, ClientConfig};
use dmsync::replay;
use dmsync_proto::codec;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!(capture = %cli.capture.display(), "dmsync replay starting");

    let Some((me, partner)) = config.identities() else {
        eprintln!("error: both --me and --partner are required (or set them in [identity])");
        return ExitCode::from(2);
    };

    let capture = match std::fs::read_to_string(&cli.capture) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: cannot read {}: {e}", cli.capture.display());
            return ExitCode::FAILURE;
        }
    };

    let events = match codec::decode_lines(&capture) {
        Ok(events) => events,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match replay::replay(events, me, partner, &config, !cli.hidden).await {
        Ok(report) => {
            print!("{}", report.render(&config.timestamp_format));
            tracing::info!("dmsync replay finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::warn!(error = %e, "replay aborted");
            eprintln!("error: replay aborted: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Logs are written to a file so stdout only carries the report. Returns a
/// [`WorkerGuard`] that must be held until shutdown to ensure all buffered
/// log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("dmsync.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}
