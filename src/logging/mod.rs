//! # Logging
//!
//! Initialises the `env_logger` backend behind the `log` facade. `RUST_LOG`, when set,
//! takes precedence over the configured levels.

pub mod config;

pub use config::LogConfig;

use std::io::Write;

/// Logging system errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Logging system already initialized")]
    AlreadyInitialized,
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Initialise logging from configuration
pub fn init(config: &LogConfig) -> Result<(), LoggingError> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(config.level_filter());

    for (module, level) in &config.features {
        let filter = LogConfig::parse_level(level)
            .ok_or_else(|| LoggingError::Config(format!("Invalid log level: {}", level)))?;
        builder.filter_module(module, filter);
    }

    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    let include_timestamp = config.include_timestamp;
    let include_module = config.include_module;
    builder.format(move |buf, record| {
        if include_timestamp {
            write!(buf, "{} ", buf.timestamp_millis())?;
        }
        write!(buf, "{:<5} ", record.level())?;
        if include_module {
            write!(buf, "[{}] ", record.module_path().unwrap_or("-"))?;
        }
        writeln!(buf, "{}", record.args())
    });

    builder
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)
}

/// Initialise logging with default configuration, ignoring repeat initialisation
pub fn init_default() {
    init(&LogConfig::default()).ok();
}
