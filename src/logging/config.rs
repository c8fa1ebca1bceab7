//! Configuration for the logging backend

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Logging configuration, embedded in the node configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default log level for all modules (TRACE, DEBUG, INFO, WARN, ERROR)
    pub default_level: String,
    /// Per-module overrides, e.g. `"edgeguard::edge_node::auth" = "DEBUG"`
    pub features: HashMap<String, String>,
    /// Include timestamps in console output
    pub include_timestamp: bool,
    /// Include module path in console output
    pub include_module: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "INFO".to_string(),
            features: HashMap::new(),
            include_timestamp: true,
            include_module: true,
        }
    }
}

impl LogConfig {
    /// Parse a level name into a `log::LevelFilter`
    pub fn parse_level(level: &str) -> Option<log::LevelFilter> {
        match level.to_uppercase().as_str() {
            "TRACE" => Some(log::LevelFilter::Trace),
            "DEBUG" => Some(log::LevelFilter::Debug),
            "INFO" => Some(log::LevelFilter::Info),
            "WARN" | "WARNING" => Some(log::LevelFilter::Warn),
            "ERROR" => Some(log::LevelFilter::Error),
            "OFF" => Some(log::LevelFilter::Off),
            _ => None,
        }
    }

    /// Effective default level, falling back to INFO for unknown names
    pub fn level_filter(&self) -> log::LevelFilter {
        Self::parse_level(&self.default_level).unwrap_or(log::LevelFilter::Info)
    }
}
