//! Configuration for the edge trust layer
//!
//! Every tunable of the gates lives in [`GuardConfig`]: replay windows, freshness bounds,
//! per-flow rate limits, suspicious-actor escalation, cache lifetimes, security logging
//! and error response verbosity. Named profiles cover the usual deployment environments.

use crate::error::{GuardError, GuardResult};
use crate::security_types::Severity;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SECOND_MS: u64 = 1_000;
const MINUTE_MS: u64 = 60 * SECOND_MS;
const HOUR_MS: u64 = 60 * MINUTE_MS;

/// Top-level configuration for the gate components
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Nonce ledger settings, shared by the bootstrap and steady-state ledgers
    pub replay: ReplayConfig,
    /// Timestamp freshness bounds
    pub freshness: FreshnessConfig,
    /// Per-flow rate limits
    pub rate_limiting: RateLimitingConfig,
    /// Suspicious-actor escalation
    pub escalation: EscalationConfig,
    /// Federated token cache
    pub token_cache: TokenCacheConfig,
    /// Ephemeral response cache
    pub response_cache: ResponseCacheConfig,
    /// Structured security event logging
    pub security_logging: SecurityLoggingConfig,
    /// Error response verbosity
    pub response_security: ResponseSecurityConfig,
}

/// Nonce ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// How long a nonce is remembered after first use
    pub replay_window_ms: u64,
    /// Interval between background sweeps of expired nonces
    pub sweep_interval_ms: u64,
    /// Upper bound on remembered nonces per ledger
    pub max_entries: usize,
}

/// Timestamp freshness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessConfig {
    /// Steady-state requests older than this are rejected (exclusive bound)
    pub max_age_ms: u64,
    /// Steady-state requests further in the future than this are rejected (exclusive bound)
    pub max_future_skew_ms: u64,
    /// Symmetric, inclusive window for bootstrap requests
    pub bootstrap_window_ms: u64,
    /// Largest request body the signature guard will buffer
    pub max_body_bytes: usize,
}

/// Limit and window for one rate-limited flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteLimit {
    pub limit: u64,
    pub window_ms: u64,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitingConfig {
    pub enabled: bool,
    /// Bootstrap / authentication attempts
    pub auth: RouteLimit,
    /// Proxied AI calls
    pub ai: RouteLimit,
    /// Interval between sweeps of stale counters
    pub sweep_interval_ms: u64,
}

/// Suspicious-actor escalation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub enabled: bool,
    /// Limited outcomes needed before an actor is blocked
    pub strike_threshold: u32,
    /// How long strikes and the block are retained
    pub block_duration_ms: u64,
    /// Whether a strike against a blocked actor restarts the block period
    pub extend_block_on_strike: bool,
    /// Interval between sweeps of expired records
    pub sweep_interval_ms: u64,
}

/// Federated token cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenCacheConfig {
    /// Upper bound on how long a verified token is trusted without re-verification
    pub ttl_ms: u64,
    pub sweep_interval_ms: u64,
}

/// Ephemeral response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseCacheConfig {
    pub enabled: bool,
    pub default_ttl_ms: u64,
    pub sweep_interval_ms: u64,
}

/// Security logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityLoggingConfig {
    /// Enable structured security logging
    pub enabled: bool,
    /// Include client IP addresses and user agents
    pub include_client_info: bool,
    /// Log successful authentications (not just failures)
    pub log_successful_auth: bool,
    /// Minimum severity level for security events
    pub min_severity: Severity,
    /// Maximum log entry size in bytes
    pub max_log_entry_size: usize,
}

/// Response security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseSecurityConfig {
    /// Detailed error messages (for debugging, disable in production)
    pub detailed_error_messages: bool,
    /// Include correlation ID in error responses
    pub include_correlation_id: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            replay: ReplayConfig::default(),
            freshness: FreshnessConfig::default(),
            rate_limiting: RateLimitingConfig::default(),
            escalation: EscalationConfig::default(),
            token_cache: TokenCacheConfig::default(),
            response_cache: ResponseCacheConfig::default(),
            security_logging: SecurityLoggingConfig::default(),
            response_security: ResponseSecurityConfig::default(),
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            replay_window_ms: 5 * MINUTE_MS,
            sweep_interval_ms: MINUTE_MS,
            max_entries: 100_000,
        }
    }
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            max_age_ms: 5 * MINUTE_MS,
            max_future_skew_ms: 30 * SECOND_MS,
            bootstrap_window_ms: 5 * MINUTE_MS,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auth: RouteLimit {
                limit: 10,
                window_ms: 15 * MINUTE_MS,
            },
            ai: RouteLimit {
                limit: 60,
                window_ms: MINUTE_MS,
            },
            sweep_interval_ms: MINUTE_MS,
        }
    }
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strike_threshold: 10,
            block_duration_ms: 24 * HOUR_MS,
            extend_block_on_strike: false,
            sweep_interval_ms: 10 * MINUTE_MS,
        }
    }
}

impl Default for TokenCacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 45 * MINUTE_MS,
            sweep_interval_ms: 45 * MINUTE_MS,
        }
    }
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_ms: 5 * MINUTE_MS,
            sweep_interval_ms: MINUTE_MS,
        }
    }
}

impl Default for SecurityLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_client_info: true,
            log_successful_auth: false,
            min_severity: Severity::Info,
            max_log_entry_size: 8192,
        }
    }
}

impl Default for ResponseSecurityConfig {
    fn default() -> Self {
        Self {
            detailed_error_messages: false,
            include_correlation_id: true,
        }
    }
}

impl GuardConfig {
    /// Production settings: terse errors, warnings and above only
    pub fn production() -> Self {
        Self {
            security_logging: SecurityLoggingConfig {
                enabled: true,
                include_client_info: false,
                log_successful_auth: false,
                min_severity: Severity::Warning,
                max_log_entry_size: 4096,
            },
            response_security: ResponseSecurityConfig {
                detailed_error_messages: false,
                include_correlation_id: true,
            },
            ..Self::default()
        }
    }

    /// Development settings: generous limits, verbose errors and logging
    pub fn development() -> Self {
        Self {
            rate_limiting: RateLimitingConfig {
                auth: RouteLimit {
                    limit: 100,
                    window_ms: 15 * MINUTE_MS,
                },
                ai: RouteLimit {
                    limit: 1000,
                    window_ms: MINUTE_MS,
                },
                ..RateLimitingConfig::default()
            },
            security_logging: SecurityLoggingConfig {
                log_successful_auth: true,
                max_log_entry_size: 16384,
                ..SecurityLoggingConfig::default()
            },
            response_security: ResponseSecurityConfig {
                detailed_error_messages: true,
                include_correlation_id: true,
            },
            ..Self::default()
        }
    }

    /// Settings for test suites: quiet logging and detailed errors
    pub fn testing() -> Self {
        Self {
            security_logging: SecurityLoggingConfig {
                enabled: false,
                include_client_info: false,
                log_successful_auth: false,
                min_severity: Severity::Critical,
                max_log_entry_size: 1024,
            },
            response_security: ResponseSecurityConfig {
                detailed_error_messages: true,
                include_correlation_id: true,
            },
            ..Self::default()
        }
    }

    /// Select a profile by environment name, keeping `self` for unknown names
    pub fn for_environment(self, env: &str) -> Self {
        match env.to_lowercase().as_str() {
            "production" | "prod" => Self::production(),
            "development" | "dev" => Self::development(),
            "testing" | "test" => Self::testing(),
            _ => self,
        }
    }

    /// Check if this is a production configuration
    pub fn is_production(&self) -> bool {
        !self.response_security.detailed_error_messages
            && self.security_logging.min_severity >= Severity::Warning
            && self.rate_limiting.enabled
            && self.escalation.enabled
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> GuardResult<()> {
        let nonzero: [(&str, u64); 8] = [
            ("Replay window", self.replay.replay_window_ms),
            ("Nonce sweep interval", self.replay.sweep_interval_ms),
            ("Freshness max age", self.freshness.max_age_ms),
            ("Bootstrap freshness window", self.freshness.bootstrap_window_ms),
            ("Counter sweep interval", self.rate_limiting.sweep_interval_ms),
            ("Token cache TTL", self.token_cache.ttl_ms),
            ("Token cache sweep interval", self.token_cache.sweep_interval_ms),
            ("Escalation sweep interval", self.escalation.sweep_interval_ms),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(GuardError::Config(format!("{} must be greater than 0", name)));
            }
        }

        if self.replay.max_entries == 0 {
            return Err(GuardError::Config(
                "Nonce ledger capacity must be greater than 0".to_string(),
            ));
        }

        if self.freshness.max_body_bytes == 0 {
            return Err(GuardError::Config(
                "Maximum body size must be greater than 0".to_string(),
            ));
        }

        // A nonce must outlive every timestamp that could still be accepted
        if self.replay.replay_window_ms < self.freshness.max_age_ms {
            return Err(GuardError::Config(
                "Replay window cannot be shorter than the freshness max age".to_string(),
            ));
        }

        if self.rate_limiting.enabled {
            for (flow, route) in [("auth", self.rate_limiting.auth), ("ai", self.rate_limiting.ai)] {
                if route.limit == 0 || route.window_ms == 0 {
                    return Err(GuardError::Config(format!(
                        "Rate limit for '{}' needs a non-zero limit and window",
                        flow
                    )));
                }
            }
        }

        if self.escalation.enabled {
            if self.escalation.strike_threshold == 0 {
                return Err(GuardError::Config(
                    "Strike threshold must be greater than 0".to_string(),
                ));
            }
            if self.escalation.block_duration_ms == 0 {
                return Err(GuardError::Config(
                    "Block duration must be greater than 0".to_string(),
                ));
            }
        }

        if self.response_cache.enabled
            && (self.response_cache.default_ttl_ms == 0 || self.response_cache.sweep_interval_ms == 0)
        {
            return Err(GuardError::Config(
                "Response cache TTL and sweep interval must be greater than 0".to_string(),
            ));
        }

        if self.security_logging.max_log_entry_size == 0 {
            return Err(GuardError::Config(
                "Log entry size must be greater than 0".to_string(),
            ));
        }

        if self.security_logging.max_log_entry_size > 1_048_576 {
            return Err(GuardError::Config(
                "Log entry size cannot exceed 1MB".to_string(),
            ));
        }

        Ok(())
    }

    /// Get configuration summary for logging
    pub fn summary(&self) -> String {
        format!(
            "GuardConfig[replay_window={}ms, freshness=(-{}ms,+{}ms), auth_limit={}/{}ms, ai_limit={}/{}ms, rate_limit={}, escalation={}x/{}ms, token_ttl={}ms]",
            self.replay.replay_window_ms,
            self.freshness.max_future_skew_ms,
            self.freshness.max_age_ms,
            self.rate_limiting.auth.limit,
            self.rate_limiting.auth.window_ms,
            self.rate_limiting.ai.limit,
            self.rate_limiting.ai.window_ms,
            self.rate_limiting.enabled,
            self.escalation.strike_threshold,
            self.escalation.block_duration_ms,
            self.token_cache.ttl_ms,
        )
    }
}

impl ReplayConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl RateLimitingConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl EscalationConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl TokenCacheConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl ResponseCacheConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validation() {
        let config = GuardConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.replay.replay_window_ms, 300_000);
        assert_eq!(config.freshness.max_future_skew_ms, 30_000);
        assert_eq!(config.escalation.strike_threshold, 10);
        assert_eq!(config.escalation.block_duration_ms, 86_400_000);
        assert!(!config.escalation.extend_block_on_strike);
        assert_eq!(config.token_cache.ttl_ms, 2_700_000);
    }

    #[test]
    fn test_profiles_validate() {
        for config in [
            GuardConfig::production(),
            GuardConfig::development(),
            GuardConfig::testing(),
        ] {
            assert!(config.validate().is_ok(), "{}", config.summary());
        }
        assert!(GuardConfig::production().is_production());
        assert!(!GuardConfig::development().is_production());
        assert!(!GuardConfig::testing().security_logging.enabled);
    }

    #[test]
    fn test_config_for_environment() {
        let base = GuardConfig::default();
        assert!(base.clone().for_environment("PROD").is_production());
        assert!(base
            .clone()
            .for_environment("dev")
            .response_security
            .detailed_error_messages);
        let unknown = base.for_environment("staging-7");
        assert_eq!(unknown.rate_limiting.ai.limit, 60);
    }

    #[test]
    fn test_invalid_zero_values() {
        let mut config = GuardConfig::default();
        config.replay.sweep_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = GuardConfig::default();
        config.escalation.strike_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = GuardConfig::default();
        config.rate_limiting.ai.window_ms = 0;
        assert!(config.validate().is_err());

        config.rate_limiting.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_replay_window_must_cover_freshness() {
        let mut config = GuardConfig::default();
        config.replay.replay_window_ms = config.freshness.max_age_ms - 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: GuardConfig = toml::from_str(
            r#"
            [rate_limiting.ai]
            limit = 5
            window_ms = 1000

            [escalation]
            extend_block_on_strike = true
            "#,
        )
        .unwrap();
        assert_eq!(config.rate_limiting.ai.limit, 5);
        assert_eq!(config.rate_limiting.auth.limit, 10);
        assert!(config.escalation.extend_block_on_strike);
        assert_eq!(config.escalation.strike_threshold, 10);
    }
}
