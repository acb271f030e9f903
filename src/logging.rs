//! Process-wide `tracing` subscriber.
//!
//! On Linux events go to the systemd journal when it is reachable. Otherwise
//! they are written to `pixbloom.log` under the configured `log_dir`, rolled
//! daily.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter variable, e.g. `PIXBLOOM_LOG=pixbloom::engine=debug`.
pub const FILTER_ENV: &str = "PIXBLOOM_LOG";

/// Keeps the file writer thread alive for the life of the process.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Journald,
    File,
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Call once, after the config is loaded.
pub fn init(log_dir: &Path) -> Result<Backend> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(journald) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(filter())
                .with(journald)
                .try_init()
                .context("A global logger is already installed")?;
            return Ok(Backend::Journald);
        }
    }

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "pixbloom.log"));
    let _ = FILE_GUARD.set(guard);

    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .context("A global logger is already installed")?;
    Ok(Backend::File)
}
