/// Common constants used across edgeguard.
///
/// These defaults are used for command line arguments and
/// configuration when explicit values are not provided.
pub const DEFAULT_HTTP_PORT: u16 = 9001;
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:9001";

/// Request headers consumed by the gates.
pub const HEADER_TIMESTAMP: &str = "x-timestamp";
pub const HEADER_NONCE: &str = "x-nonce";
pub const HEADER_SIGNATURE: &str = "x-signature";
pub const HEADER_DEVICE_ID: &str = "x-device-id";
pub const HEADER_USER_ID: &str = "x-user-id";

/// Rate-limit response headers.
pub const HEADER_RATE_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_RATE_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RATE_RESET: &str = "X-RateLimit-Reset";

/// Minimum accepted length, in bytes, of the deployment signing secret.
pub const MIN_SIGNING_SECRET_BYTES: usize = 32;

/// Environment variables consulted by the config loader.
pub const ENV_CONFIG_PATH: &str = "EDGEGUARD_CONFIG";
pub const ENV_API_KEY: &str = "EDGEGUARD_API_KEY";
pub const ENV_APP_ID: &str = "EDGEGUARD_APP_ID";
pub const ENV_SIGNING_SECRET: &str = "EDGEGUARD_SIGNING_SECRET";
pub const ENV_ALLOWED_ORIGINS: &str = "EDGEGUARD_ALLOWED_ORIGINS";
pub const ENV_IDP_VERIFY_URL: &str = "EDGEGUARD_IDP_VERIFY_URL";
pub const ENV_BIND: &str = "EDGEGUARD_BIND";
pub const ENV_ENVIRONMENT: &str = "EDGEGUARD_ENV";
