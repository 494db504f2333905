//! Tickwatch streaming watchlist library
//!
//! A streaming stock watchlist core: a websocket market-data session with
//! an in-memory price cache, synthetic-data fallback under rate limiting,
//! and a price-alert engine that hands notification requests to the OS.

pub mod alerts;
pub mod cli;
pub mod config;
pub mod feed;
pub mod market_data;
pub mod notify;
pub mod session;

use std::path::Path;

use anyhow::{Context, Result};

/// Application result type for consistent error handling
pub type AppResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Initialize tracing with a stdout layer and a non-blocking file layer.
///
/// The returned guard must be held for the process lifetime or buffered
/// log lines are lost on exit.
pub fn init_logging(
    level: &str,
    log_file_path: &str,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let path = Path::new(log_file_path);
    let directory = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(directory) = directory {
        std::fs::create_dir_all(directory)
            .with_context(|| format!("Failed to create log directory: {}", directory.display()))?;
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tickwatch.log".to_string());

    let file_appender = tracing_appender::rolling::never(
        directory.unwrap_or_else(|| Path::new(".")),
        file_name,
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tickwatch={}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(guard)
}
