//! # Security Types Module
//!
//! Shared security enums used by the gates, the security logger and the configuration.

use serde::{Deserialize, Serialize};

/// Universal severity levels for security events and errors
///
/// - **Info**: Normal operations, routine events
/// - **Warning**: Potential issues that should be monitored
/// - **Error**: Failed operations requiring attention
/// - **Critical**: Immediate action required
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Informational events for normal operations
    Info,
    /// Warning events for potential issues that should be monitored
    Warning,
    /// Error events for failed operations requiring attention
    Error,
    /// Critical events requiring immediate intervention
    Critical,
}

impl Severity {
    /// Returns a numeric value for severity comparison (higher = more severe)
    pub fn level(&self) -> u8 {
        match self {
            Self::Info => 0,
            Self::Warning => 1,
            Self::Error => 2,
            Self::Critical => 3,
        }
    }

    /// Returns true if this severity is at least as severe as the given threshold
    pub fn meets_threshold(&self, threshold: Self) -> bool {
        self.level() >= threshold.level()
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.level().cmp(&other.level())
    }
}
