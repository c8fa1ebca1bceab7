use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::net::SocketAddr;
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::{
    DEFAULT_BIND_ADDRESS, ENV_ALLOWED_ORIGINS, ENV_API_KEY, ENV_APP_ID, ENV_BIND, ENV_CONFIG_PATH,
    ENV_ENVIRONMENT, ENV_IDP_VERIFY_URL, ENV_SIGNING_SECRET, MIN_SIGNING_SECRET_BYTES,
};
use crate::edge_node::auth::GuardConfig;
use crate::error::{GuardError, GuardResult};
use crate::logging::LogConfig;

/// Secret configuration value. Redacted in `Debug` and serialized output, zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Secret)
    }
}

/// External identity provider used by the federated token gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityProviderConfig {
    /// Endpoint receiving `POST { "token": ... }`
    pub verify_url: String,
    #[serde(default = "default_idp_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_idp_timeout_ms() -> u64 {
    5_000
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

fn default_environment() -> String {
    "production".to_string()
}

/// Deployment configuration for an edge node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeNodeConfig {
    /// Socket address the HTTP server binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Environment name, selects the gate profile when `guard` is not given
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Static API key baked into clients, proves possession during bootstrap
    #[serde(default)]
    pub api_key: Option<Secret>,
    /// Application identifier included in the bootstrap MAC
    #[serde(default)]
    pub app_identifier: Option<String>,
    /// Deployment HMAC signing secret handed out by the bootstrap handshake
    #[serde(default)]
    pub signing_secret: Option<Secret>,
    /// CORS allow-list of caller origins
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Federated identity provider; absent means the token gate is bypassed
    #[serde(default)]
    pub identity_provider: Option<IdentityProviderConfig>,
    /// Take the caller IP from the first `X-Forwarded-For` hop
    #[serde(default)]
    pub trust_forwarded_for: bool,
    #[serde(default)]
    pub log: LogConfig,
    /// Explicit gate configuration, overrides the environment profile
    #[serde(default)]
    pub guard: Option<GuardConfig>,
}

impl Default for EdgeNodeConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            environment: default_environment(),
            api_key: None,
            app_identifier: None,
            signing_secret: None,
            allowed_origins: Vec::new(),
            identity_provider: None,
            trust_forwarded_for: false,
            log: LogConfig::default(),
            guard: None,
        }
    }
}

impl EdgeNodeConfig {
    /// Gate configuration in effect: the explicit one, else the environment profile
    pub fn guard_config(&self) -> GuardConfig {
        self.guard
            .clone()
            .unwrap_or_else(|| GuardConfig::default().for_environment(&self.environment))
    }

    pub fn with_bind_address(mut self, address: &str) -> Self {
        self.bind_address = address.to_string();
        self
    }

    pub fn with_credentials(mut self, api_key: &str, app_identifier: &str, signing_secret: &str) -> Self {
        self.api_key = Some(Secret::new(api_key));
        self.app_identifier = Some(app_identifier.to_string());
        self.signing_secret = Some(Secret::new(signing_secret));
        self
    }

    pub fn with_guard(mut self, guard: GuardConfig) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn is_identity_provider_configured(&self) -> bool {
        self.identity_provider
            .as_ref()
            .is_some_and(|idp| !idp.verify_url.trim().is_empty())
    }

    /// Apply `EDGEGUARD_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(value) = read(ENV_API_KEY) {
            self.api_key = Some(Secret::new(value));
        }
        if let Some(value) = read(ENV_APP_ID) {
            self.app_identifier = Some(value);
        }
        if let Some(value) = read(ENV_SIGNING_SECRET) {
            self.signing_secret = Some(Secret::new(value));
        }
        if let Some(value) = read(ENV_ALLOWED_ORIGINS) {
            self.allowed_origins = value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = read(ENV_IDP_VERIFY_URL) {
            let timeout_ms = self
                .identity_provider
                .as_ref()
                .map_or_else(default_idp_timeout_ms, |idp| idp.timeout_ms);
            self.identity_provider = Some(IdentityProviderConfig {
                verify_url: value,
                timeout_ms,
            });
        }
        if let Some(value) = read(ENV_BIND) {
            self.bind_address = value;
        }
        if let Some(value) = read(ENV_ENVIRONMENT) {
            self.environment = value;
        }
    }

    /// Validate deployment facts and the effective gate configuration
    pub fn validate(&self) -> GuardResult<()> {
        self.bind_address.parse::<SocketAddr>().map_err(|e| {
            GuardError::Config(format!("Invalid bind address '{}': {}", self.bind_address, e))
        })?;

        if let Some(secret) = &self.signing_secret {
            if secret.len() < MIN_SIGNING_SECRET_BYTES {
                return Err(GuardError::Config(format!(
                    "Signing secret must be at least {} bytes",
                    MIN_SIGNING_SECRET_BYTES
                )));
            }
        }

        if self.api_key.as_ref().is_some_and(Secret::is_empty) {
            return Err(GuardError::Config("API key cannot be empty".to_string()));
        }

        if let Some(idp) = &self.identity_provider {
            if !idp.verify_url.starts_with("http://") && !idp.verify_url.starts_with("https://") {
                return Err(GuardError::Config(format!(
                    "Identity provider URL must be http(s): {}",
                    idp.verify_url
                )));
            }
            if idp.timeout_ms == 0 {
                return Err(GuardError::Config(
                    "Identity provider timeout must be greater than 0".to_string(),
                ));
            }
        }

        self.guard_config().validate()
    }
}

/// Load a node configuration from the given path or from the `EDGEGUARD_CONFIG`
/// environment variable, then apply environment overrides and validate.
///
/// `.toml` files are parsed as TOML, anything else as JSON. A missing file yields the
/// default configuration.
pub fn load_node_config(path: Option<&str>) -> GuardResult<EdgeNodeConfig> {
    let config_path = path
        .map(str::to_string)
        .or_else(|| std::env::var(ENV_CONFIG_PATH).ok())
        .unwrap_or_else(|| "config/edgeguard.json".to_string());

    let mut config = read_config_file(Path::new(&config_path))?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Parse a configuration file without environment overrides
pub fn read_config_file(path: &Path) -> GuardResult<EdgeNodeConfig> {
    if !path.exists() {
        log::info!(
            "No configuration file at {}, using defaults",
            path.display()
        );
        return Ok(EdgeNodeConfig::default());
    }

    let contents = std::fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    let parsed = if is_toml {
        toml::from_str::<EdgeNodeConfig>(&contents).map_err(GuardError::from)
    } else {
        serde_json::from_str::<EdgeNodeConfig>(&contents).map_err(GuardError::from)
    };

    parsed.map_err(|e| {
        log::error!("Failed to parse node configuration {}: {}", path.display(), e);
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const SECRET_32: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_secret_is_redacted() {
        let secret = Secret::new("super-secret-value");
        assert_eq!(format!("{:?}", secret), "Secret([REDACTED])");
        let json = serde_json::to_string(&secret).unwrap();
        assert!(!json.contains("super"));
        let parsed: Secret = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(parsed.expose(), "abc");
    }

    #[test]
    fn test_short_signing_secret_rejected() {
        let config = EdgeNodeConfig::default().with_credentials("key", "app1", "too-short");
        assert!(config.validate().is_err());

        let config = EdgeNodeConfig::default().with_credentials("key", "app1", SECRET_32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_secrets_are_tolerated() {
        assert!(EdgeNodeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_API_KEY, "api-key"),
            (ENV_APP_ID, "app1"),
            (ENV_ALLOWED_ORIGINS, "https://a.example, https://b.example,"),
            (ENV_IDP_VERIFY_URL, "https://idp.example/verify"),
            (ENV_ENVIRONMENT, "development"),
            (ENV_BIND, ""),
        ]
        .into_iter()
        .collect();

        let mut config = EdgeNodeConfig::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.api_key.as_ref().map(Secret::expose), Some("api-key"));
        assert_eq!(config.app_identifier.as_deref(), Some("app1"));
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert!(config.is_identity_provider_configured());
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert!(config.guard_config().response_security.detailed_error_messages);
    }

    #[test]
    fn test_load_json_and_toml() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("node.json");
        let mut file = std::fs::File::create(&json_path).unwrap();
        write!(
            file,
            r#"{{ "bind_address": "0.0.0.0:8080", "app_identifier": "app1", "signing_secret": "{}" }}"#,
            SECRET_32
        )
        .unwrap();
        let config = read_config_file(&json_path).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.signing_secret.as_ref().map(Secret::len), Some(32));

        let toml_path = dir.path().join("node.toml");
        std::fs::write(
            &toml_path,
            r#"
            environment = "testing"
            allowed_origins = ["https://app.example"]

            [guard.rate_limiting.ai]
            limit = 3
            window_ms = 1000
            "#,
        )
        .unwrap();
        let config = read_config_file(&toml_path).unwrap();
        assert_eq!(config.guard_config().rate_limiting.ai.limit, 3);
        assert_eq!(config.allowed_origins.len(), 1);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = read_config_file(Path::new("/definitely/not/here.json")).unwrap();
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            read_config_file(&path),
            Err(GuardError::Serialization(_))
        ));
    }
}
