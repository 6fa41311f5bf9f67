//! tracing subscriber setup for the `vgit` binary

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_PREFIX: &str = "mount.log";
const DEFAULT_FILTER: &str = "vgit_daemon=info,vgit=info,common=info";

fn env_filter() -> EnvFilter {
    EnvFilter::builder().parse_lossy(
        std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
    )
}

/// Log to stderr only. Used by client commands.
pub fn init_console() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Log to stderr and to a daily rolling file under `logs_dir`.
///
/// The guard must be held for as long as the process logs.
pub fn init_mount(logs_dir: &Path) -> std::io::Result<WorkerGuard> {
    std::fs::create_dir_all(logs_dir)?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, logs_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .with_line_number(true)
        .with_writer(non_blocking.and(std::io::stderr))
        .try_init();

    tracing::info!("logging to {}", logs_dir.join(LOG_FILE_PREFIX).display());
    Ok(guard)
}
