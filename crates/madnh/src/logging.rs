//! Tracing setup for the session runner.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{filter::ParseError, fmt, prelude::*, EnvFilter};

/// Filter for the configured level, overridden by `RUST_LOG` when it parses.
fn session_filter(level: &str) -> Result<EnvFilter, ParseError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level),
    }
}

/// Installs the global subscriber: compact lines on a terminal, JSON when
/// either the flag or the configuration asks for it.
///
/// Fails if a global subscriber is already installed.
pub fn setup_logging(
    config: &LoggingSettings,
    json_format: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = json_format || config.json_format;

    tracing_subscriber::registry()
        .with(session_filter(&config.level)?)
        .with(json.then(|| fmt::layer().json().flatten_event(true).with_thread_names(true)))
        .with((!json).then(|| fmt::layer().compact().with_thread_names(true)))
        .try_init()?;

    info!(
        "🔧 Logging at '{}' ({})",
        config.level,
        if json { "json" } else { "compact" }
    );
    Ok(())
}
