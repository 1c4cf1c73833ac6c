//! Logging initialization helpers.
//!
//! The crate logs through `tracing` throughout; embedders that do not
//! install their own subscriber can use these helpers for a sensible
//! console setup.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Configuration for logging output.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter. If `None`, falls back to `RUST_LOG` or INFO.
    pub level: Option<LevelFilter>,
    /// Whether to output logs to console (stderr).
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            console: true,
        }
    }
}

/// Initialize console logging with the given level.
pub fn init_console_logging(level: LevelFilter) -> Result<(), String> {
    init_logging(LoggingConfig {
        level: Some(level),
        console: true,
    })
}

/// Initialize logging with the given configuration.
///
/// With console output disabled, logging is left uninstalled and tracing
/// macros become no-ops.
pub fn init_logging(config: LoggingConfig) -> Result<(), String> {
    if !config.console {
        return Ok(());
    }

    let env_filter = match config.level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(LevelFilter::INFO.to_string())),
    };

    let console_layer = fmt::layer().with_target(true).with_thread_ids(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init()
        .map_err(|e| e.to_string())
}
