use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_ENV: &str = "GALLERY_TUI_LOG";
const DEFAULT_FILTER: &str = "info";
const LOG_FILE_PREFIX: &str = "gallery-tui.log";

static GUARD: OnceCell<WorkerGuard> = OnceCell::new();

pub fn default_log_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("gallery-tui").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

fn env_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|value| !value.trim().is_empty())
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Routes `tracing` output to a daily rolling file. The terminal belongs to
/// the UI, so nothing is written to stdout or stderr.
pub fn init(log_dir: Option<PathBuf>) -> Result<PathBuf> {
    if GUARD.get().is_some() {
        return Err(anyhow!("logging: already initialized"));
    }
    let log_dir = log_dir.unwrap_or_else(default_log_dir);
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("logging: create directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let directives = std::env::var(LOG_ENV).ok();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_filter(env_filter(directives.as_deref()));

    tracing_subscriber::registry()
        .with(file_layer)
        .try_init()
        .context("logging: install subscriber")?;

    let _ = GUARD.set(guard);
    tracing::info!(version = crate::VERSION, dir = %log_dir.display(), "logging started");
    Ok(log_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn filter_defaults_to_info() {
        assert_eq!(env_filter(None).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(
            env_filter(Some("  ")).max_level_hint(),
            Some(LevelFilter::INFO)
        );
    }

    #[test]
    fn filter_honours_directives() {
        assert_eq!(
            env_filter(Some("debug")).max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
    }
}
