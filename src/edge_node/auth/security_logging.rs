//! Structured security event logging
//!
//! Gate outcomes are emitted as single-line JSON records prefixed with `SECURITY_EVENT:`
//! through the `log` facade, filtered by a minimum severity and capped in size.

use actix_web::HttpRequest;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::auth_config::SecurityLoggingConfig;
use super::auth_errors::AuthenticationError;
use crate::edge_node::clock::now_millis;
use crate::security_types::Severity;

/// Types of security events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityEventType {
    AuthenticationSuccess,
    AuthenticationFailure,
    ReplayAttempt,
    RateLimitExceeded,
    SuspiciousActorEscalated,
    SuspiciousActorBlocked,
    ConfigurationError,
    SecretIssued,
}

/// Client information for security logging
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
}

/// Request information for security logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
}

/// A single security-relevant outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_id: String,
    pub correlation_id: String,
    pub timestamp_ms: u64,
    pub event_type: SecurityEventType,
    pub severity: Severity,
    /// Gate that produced the event, e.g. `signature_guard`
    pub gate: String,
    pub client_info: Option<ClientInfo>,
    pub request_info: Option<RequestInfo>,
    pub error_code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, serde_json::Value>,
}

impl SecurityEvent {
    pub fn new(
        event_type: SecurityEventType,
        severity: Severity,
        gate: &str,
        correlation_id: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            correlation_id: correlation_id.to_string(),
            timestamp_ms: now_millis(),
            event_type,
            severity,
            gate: gate.to_string(),
            client_info: None,
            request_info: None,
            error_code: None,
            message: message.into(),
            details: HashMap::new(),
        }
    }

    /// Event describing a gate rejection
    pub fn from_rejection(gate: &str, error: &AuthenticationError) -> Self {
        let event_type = match error {
            AuthenticationError::ReplayedNonce { .. } => SecurityEventType::ReplayAttempt,
            AuthenticationError::RateLimited { .. } => SecurityEventType::RateLimitExceeded,
            AuthenticationError::SuspiciousActorBlocked { .. } => {
                SecurityEventType::SuspiciousActorBlocked
            }
            AuthenticationError::ServerMisconfigured { .. } => SecurityEventType::ConfigurationError,
            _ => SecurityEventType::AuthenticationFailure,
        };
        let mut event = Self::new(
            event_type,
            error.severity(),
            gate,
            error.correlation_id(),
            error.to_string(),
        );
        event.error_code = Some(error.error_code().to_string());
        event
    }

    pub fn with_request(mut self, req: &HttpRequest, client: Option<ClientInfo>) -> Self {
        self.request_info = Some(RequestInfo {
            method: req.method().to_string(),
            path: req.path().to_string(),
        });
        self.client_info = client;
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

impl ClientInfo {
    pub fn from_request(req: &HttpRequest, trust_forwarded_for: bool) -> Self {
        Self {
            ip_address: Some(client_ip(req, trust_forwarded_for)),
            user_agent: req
                .headers()
                .get("user-agent")
                .and_then(|h| h.to_str().ok())
                .map(str::to_string),
            device_id: req
                .headers()
                .get(crate::constants::HEADER_DEVICE_ID)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string),
        }
    }
}

/// Caller IP: first `X-Forwarded-For` hop when trusted, otherwise the peer address
pub fn client_ip(req: &HttpRequest, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty());
        if let Some(hop) = forwarded {
            return hop.to_string();
        }
    }

    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Security logger for structured security events
#[derive(Debug, Clone)]
pub struct SecurityLogger {
    config: SecurityLoggingConfig,
}

impl SecurityLogger {
    pub fn new(config: SecurityLoggingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SecurityLoggingConfig {
        &self.config
    }

    /// Client details to attach, honouring `include_client_info`
    pub fn client_info(&self, req: &HttpRequest, trust_forwarded_for: bool) -> Option<ClientInfo> {
        self.config
            .include_client_info
            .then(|| ClientInfo::from_request(req, trust_forwarded_for))
    }

    /// Emit the event if enabled and severe enough. Returns whether it was written.
    pub fn log_security_event(&self, event: &SecurityEvent) -> bool {
        if !self.config.enabled || !event.severity.meets_threshold(self.config.min_severity) {
            return false;
        }

        if event.event_type == SecurityEventType::AuthenticationSuccess
            && !self.config.log_successful_auth
        {
            return false;
        }

        match self.serialize_event(event) {
            Ok(json_str) => {
                match event.severity {
                    Severity::Info => info!("SECURITY_EVENT: {}", json_str),
                    Severity::Warning => warn!("SECURITY_EVENT: {}", json_str),
                    Severity::Error | Severity::Critical => error!("SECURITY_EVENT: {}", json_str),
                }
                true
            }
            Err(e) => {
                error!("Failed to serialize security event: {}", e);
                false
            }
        }
    }

    pub fn serialize_event(&self, event: &SecurityEvent) -> Result<String, serde_json::Error> {
        let json_str = serde_json::to_string(event)?;

        if json_str.len() > self.config.max_log_entry_size {
            return serde_json::to_string(&serde_json::json!({
                "truncated": true,
                "original_size": json_str.len(),
                "event_id": event.event_id,
                "correlation_id": event.correlation_id,
                "event_type": event.event_type,
            }));
        }

        Ok(json_str)
    }
}
