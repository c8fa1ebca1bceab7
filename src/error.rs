use std::io;

/// Operational errors raised outside the per-request gates.
///
/// Per-request rejections are [`crate::edge_node::auth::AuthenticationError`]; this type covers
/// configuration loading, crypto setup and server lifecycle failures.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// Errors related to configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors raised by cryptographic primitives
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Errors related to the identity provider
    #[error("Identity provider error: {0}")]
    IdentityProvider(String),

    /// Errors related to IO operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Errors related to serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for GuardError {
    fn from(error: serde_json::Error) -> Self {
        GuardError::Serialization(error.to_string())
    }
}

impl From<toml::de::Error> for GuardError {
    fn from(error: toml::de::Error) -> Self {
        GuardError::Serialization(error.to_string())
    }
}

pub type GuardResult<T> = Result<T, GuardError>;
