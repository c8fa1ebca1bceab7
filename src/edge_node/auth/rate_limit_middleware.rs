//! Rate-limit and suspicious-actor middleware
//!
//! [`SuspiciousActorGate`] sits outermost and turns blocked actors away before any other
//! accounting. [`RateLimitMiddleware`] counts each call against a flow-specific key,
//! reports the window in `X-RateLimit-*` headers and records a strike against the
//! caller's actor key whenever a call is limited.

use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::{Error, HttpMessage};
use futures_util::future::LocalBoxFuture;
use log::{debug, warn};
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

use super::auth_config::{GuardConfig, ResponseSecurityConfig, RouteLimit};
use super::auth_errors::{AuthenticationError, CustomAuthError};
use super::auth_types::{RateDecision, RateLimiter, SuspiciousActorRegistry, VerifiedIdentity};
use super::security_logging::{client_ip, SecurityEvent, SecurityEventType, SecurityLogger};
use crate::constants::{
    HEADER_DEVICE_ID, HEADER_RATE_LIMIT, HEADER_RATE_REMAINING, HEADER_RATE_RESET, HEADER_USER_ID,
};
use crate::security_types::Severity;

/// Rate-limited flows and how each derives its key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitFlow {
    /// Credential bootstrap attempts, keyed `auth:<ip>:<deviceId>`
    Auth,
    /// AI proxy calls, keyed `ai:<ip>:<userId>:<deviceId>`
    Ai,
}

impl RateLimitFlow {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Ai => "ai",
        }
    }

    pub fn route_limit<'a>(&self, config: &'a GuardConfig) -> &'a RouteLimit {
        match self {
            Self::Auth => &config.rate_limiting.auth,
            Self::Ai => &config.rate_limiting.ai,
        }
    }

    /// Rate-limit key for a request from `actor`
    pub fn key(&self, req: &ServiceRequest, actor: &str) -> String {
        let device_id = header_or(req, HEADER_DEVICE_ID, "unknown");
        match self {
            Self::Auth => format!("auth:{}:{}", actor, device_id),
            Self::Ai => {
                let user_id = req
                    .extensions()
                    .get::<VerifiedIdentity>()
                    .map(|identity| identity.user_id.clone())
                    .unwrap_or_else(|| header_or(req, HEADER_USER_ID, "anon"));
                format!("ai:{}:{}:{}", actor, user_id, device_id)
            }
        }
    }
}

fn header_or(req: &ServiceRequest, name: &str, fallback: &str) -> String {
    req.headers()
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// `X-RateLimit-*` headers describing `decision`
pub fn rate_limit_headers(decision: &RateDecision) -> Vec<(HeaderName, HeaderValue)> {
    [
        (HEADER_RATE_LIMIT, decision.limit),
        (HEADER_RATE_REMAINING, decision.remaining),
        (HEADER_RATE_RESET, decision.reset_at_ms),
    ]
    .into_iter()
    .filter_map(|(name, value)| {
        HeaderName::from_bytes(name.as_bytes())
            .ok()
            .map(|name| (name, HeaderValue::from(value)))
    })
    .collect()
}

/// Response and logging settings shared by both middlewares
struct GateContext {
    response_security: ResponseSecurityConfig,
    security_logger: SecurityLogger,
    trust_forwarded_for: bool,
}

impl GateContext {
    fn new(config: &GuardConfig, trust_forwarded_for: bool) -> Self {
        Self {
            response_security: config.response_security.clone(),
            security_logger: SecurityLogger::new(config.security_logging.clone()),
            trust_forwarded_for,
        }
    }

    fn actor(&self, req: &ServiceRequest) -> String {
        client_ip(req.request(), self.trust_forwarded_for)
    }

    fn log_rejection(&self, req: &ServiceRequest, gate: &str, error: &AuthenticationError) {
        let client = self
            .security_logger
            .client_info(req.request(), self.trust_forwarded_for);
        let event = SecurityEvent::from_rejection(gate, error).with_request(req.request(), client);
        self.security_logger.log_security_event(&event);
    }
}

struct RateLimitState {
    limiter: Arc<RateLimiter>,
    registry: Arc<SuspiciousActorRegistry>,
    enabled: bool,
    context: GateContext,
}

/// Actix-Web middleware applying the per-flow rate limit
pub struct RateLimitMiddleware {
    flow: RateLimitFlow,
    route_limit: RouteLimit,
    state: Arc<RateLimitState>,
}

impl RateLimitMiddleware {
    pub fn new(
        flow: RateLimitFlow,
        limiter: Arc<RateLimiter>,
        registry: Arc<SuspiciousActorRegistry>,
        config: &GuardConfig,
        trust_forwarded_for: bool,
    ) -> Self {
        Self {
            flow,
            route_limit: *flow.route_limit(config),
            state: Arc::new(RateLimitState {
                limiter,
                registry,
                enabled: config.rate_limiting.enabled,
                context: GateContext::new(config, trust_forwarded_for),
            }),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitService<S>;
    type InitError = ();
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RateLimitService {
            service: Rc::new(service),
            flow: self.flow,
            route_limit: self.route_limit,
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct RateLimitService<S> {
    service: Rc<S>,
    flow: RateLimitFlow,
    route_limit: RouteLimit,
    state: Arc<RateLimitState>,
}

impl<S, B> Service<ServiceRequest> for RateLimitService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let flow = self.flow;
        let route_limit = self.route_limit;
        let state = Arc::clone(&self.state);

        Box::pin(async move {
            if !state.enabled {
                return service.call(req).await.map(ServiceResponse::map_into_left_body);
            }

            let context = &state.context;
            let actor = context.actor(&req);
            let key = flow.key(&req, &actor);
            let decision = state
                .limiter
                .admit(&key, route_limit.limit, route_limit.window_ms);
            let headers = rate_limit_headers(&decision);

            if !decision.admitted {
                let correlation_id = Uuid::new_v4().to_string();
                let status = state.registry.record_strike(&actor);
                warn!(
                    "Rate limit exceeded on {} flow for actor {} ({} strikes)",
                    flow.name(),
                    actor,
                    status.strikes
                );
                if status.blocked && status.strikes == state.registry.strike_threshold() {
                    let event = SecurityEvent::new(
                        SecurityEventType::SuspiciousActorEscalated,
                        Severity::Critical,
                        "rate_limiter",
                        &correlation_id,
                        "actor blocked after repeated rate-limit violations",
                    )
                    .with_detail("strikes", status.strikes)
                    .with_detail("blocked_until_ms", status.expires_at_ms)
                    .with_request(
                        req.request(),
                        context
                            .security_logger
                            .client_info(req.request(), context.trust_forwarded_for),
                    );
                    context.security_logger.log_security_event(&event);
                }

                let error = AuthenticationError::RateLimited {
                    limit: decision.limit,
                    window_ms: decision.window_ms,
                    reset_at_ms: decision.reset_at_ms,
                    correlation_id,
                };
                context.log_rejection(&req, "rate_limiter", &error);
                let response = req.error_response(
                    CustomAuthError::new(error, &context.response_security).with_headers(headers),
                );
                return Ok(response.map_into_right_body());
            }

            debug!(
                "Admitted {} call for key {} ({} remaining)",
                flow.name(),
                key,
                decision.remaining
            );
            let mut response = service.call(req).await?;
            let response_headers = response.headers_mut();
            for (name, value) in headers {
                response_headers.insert(name, value);
            }
            Ok(response.map_into_left_body())
        })
    }
}

/// Outermost gate that turns away actors inside their block period
pub struct SuspiciousActorGate {
    state: Arc<GateState>,
}

struct GateState {
    registry: Arc<SuspiciousActorRegistry>,
    context: GateContext,
}

impl SuspiciousActorGate {
    pub fn new(
        registry: Arc<SuspiciousActorRegistry>,
        config: &GuardConfig,
        trust_forwarded_for: bool,
    ) -> Self {
        Self {
            state: Arc::new(GateState {
                registry,
                context: GateContext::new(config, trust_forwarded_for),
            }),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for SuspiciousActorGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = SuspiciousActorService<S>;
    type InitError = ();
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(SuspiciousActorService {
            service: Rc::new(service),
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct SuspiciousActorService<S> {
    service: Rc<S>,
    state: Arc<GateState>,
}

impl<S, B> Service<ServiceRequest> for SuspiciousActorService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let state = Arc::clone(&self.state);

        Box::pin(async move {
            if state.registry.is_enabled() {
                let context = &state.context;
                let actor = context.actor(&req);
                if state.registry.is_blocked(&actor) {
                    debug!("Dropping request from blocked actor {}", actor);
                    let error = AuthenticationError::SuspiciousActorBlocked {
                        actor,
                        correlation_id: Uuid::new_v4().to_string(),
                    };
                    context.log_rejection(&req, "suspicious_actor_gate", &error);
                    let response =
                        req.error_response(CustomAuthError::new(error, &context.response_security));
                    return Ok(response.map_into_right_body());
                }
            }
            service.call(req).await.map(ServiceResponse::map_into_left_body)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge_node::auth::auth_config::EscalationConfig;
    use actix_web::http::StatusCode;
    use actix_web::test as actix_test;
    use actix_web::{web, App, HttpResponse};
    use std::net::SocketAddr;

    fn config(limit: u64, threshold: u32) -> GuardConfig {
        let mut config = GuardConfig::testing();
        config.rate_limiting.ai = RouteLimit {
            limit,
            window_ms: 60_000,
        };
        config.escalation = EscalationConfig {
            strike_threshold: threshold,
            ..EscalationConfig::default()
        };
        config
    }

    fn peer() -> SocketAddr {
        "10.0.0.7:4242".parse().unwrap()
    }

    #[test]
    fn test_rate_limit_headers() {
        let headers = rate_limit_headers(&RateDecision {
            admitted: true,
            limit: 5,
            remaining: 2,
            reset_at_ms: 1_000,
            window_ms: 60_000,
        });
        let find = |name: &str| {
            headers
                .iter()
                .find(|(n, _)| n.as_str().eq_ignore_ascii_case(name))
                .map(|(_, v)| v.to_str().unwrap().to_string())
        };
        assert_eq!(find("x-ratelimit-limit").as_deref(), Some("5"));
        assert_eq!(find("x-ratelimit-remaining").as_deref(), Some("2"));
        assert_eq!(find("x-ratelimit-reset").as_deref(), Some("1000"));
    }

    #[actix_web::test]
    async fn test_limit_then_block() {
        let config = config(2, 2);
        let limiter = Arc::new(RateLimiter::new());
        let registry = Arc::new(SuspiciousActorRegistry::new(config.escalation.clone()));
        let app = actix_test::init_service(
            App::new()
                .wrap(SuspiciousActorGate::new(Arc::clone(&registry), &config, false))
                .service(
                    web::scope("/api/ai")
                        .wrap(RateLimitMiddleware::new(
                            RateLimitFlow::Ai,
                            Arc::clone(&limiter),
                            Arc::clone(&registry),
                            &config,
                            false,
                        ))
                        .route("/echo", web::post().to(|| async { HttpResponse::Ok().finish() })),
                ),
        )
        .await;

        let call = || {
            actix_test::TestRequest::post()
                .uri("/api/ai/echo")
                .peer_addr(peer())
                .insert_header((HEADER_DEVICE_ID, "d1"))
                .to_request()
        };

        let resp = actix_test::call_service(&app, call()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("x-ratelimit-remaining").unwrap(), "1");
        let resp = actix_test::call_service(&app, call()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("x-ratelimit-remaining").unwrap(), "0");

        let resp = actix_test::call_service(&app, call()).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get("x-ratelimit-limit").unwrap(), "2");
        let json: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(
            json["error"],
            "Too many requests: limit of 2 requests per 1 minute(s) exceeded"
        );

        let resp = actix_test::call_service(&app, call()).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(registry.is_blocked("10.0.0.7"));

        let counted = limiter.counter("ai:10.0.0.7:anon:d1").map(|c| c.count);
        let resp = actix_test::call_service(&app, call()).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(actix_test::read_body(resp).await.is_empty());
        assert_eq!(limiter.counter("ai:10.0.0.7:anon:d1").map(|c| c.count), counted);
    }

    #[actix_web::test]
    async fn test_ai_key_prefers_verified_identity() {
        let req = actix_test::TestRequest::post()
            .insert_header((HEADER_USER_ID, "claimed"))
            .insert_header((HEADER_DEVICE_ID, "d9"))
            .to_srv_request();
        assert_eq!(RateLimitFlow::Ai.key(&req, "1.1.1.1"), "ai:1.1.1.1:claimed:d9");

        req.extensions_mut().insert(VerifiedIdentity {
            user_id: "verified".to_string(),
            email: None,
        });
        assert_eq!(RateLimitFlow::Ai.key(&req, "1.1.1.1"), "ai:1.1.1.1:verified:d9");

        let bare = actix_test::TestRequest::post().to_srv_request();
        assert_eq!(RateLimitFlow::Auth.key(&bare, "1.1.1.1"), "auth:1.1.1.1:unknown");
        assert_eq!(RateLimitFlow::Ai.key(&bare, "1.1.1.1"), "ai:1.1.1.1:anon:unknown");
    }
}
