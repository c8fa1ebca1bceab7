use super::auth::{
    BootstrapCredentials, BootstrapHandshake, FederatedTokenCache, FederatedTokenGate,
    GuardConfig, HttpIdentityVerifier, IdentityVerifier, NonceLedger, RateLimitFlow,
    RateLimitMiddleware, RateLimiter, RequestSignatureGuard, SecurityLogger,
    SignatureGuardMiddleware, SuspiciousActorGate, SuspiciousActorRegistry,
};
use super::clock::now_millis;
use super::config::EdgeNodeConfig;
use super::response_cache::ResponseCache;
use super::routes::{ai_routes, bootstrap_routes, system_routes};
use super::sweeper::SweepGroup;
use crate::error::{GuardError, GuardResult};

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer as ActixHttpServer};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// HTTP server for the edge node.
///
/// Mounts the bootstrap endpoint, the status endpoint and the `/api/ai` scope behind
/// the gate chain, and owns the background sweeps of every store.
pub struct EdgeHttpServer {
    config: EdgeNodeConfig,
    state: web::Data<AppState>,
}

/// Shared application state for the HTTP server.
///
/// Every store is built once here and handed by `Arc` to the gate that uses it.
pub struct AppState {
    pub guard_config: GuardConfig,
    pub trust_forwarded_for: bool,
    /// Ledger of bootstrap nonces, never shared with the request ledger
    pub bootstrap_ledger: Arc<NonceLedger>,
    /// Ledger of steady-state request nonces
    pub request_ledger: Arc<NonceLedger>,
    pub handshake: Arc<BootstrapHandshake>,
    pub signature_guard: Arc<RequestSignatureGuard>,
    /// `None` when no identity provider is configured
    pub token_cache: Option<Arc<FederatedTokenCache>>,
    pub rate_limiter: Arc<RateLimiter>,
    pub actor_registry: Arc<SuspiciousActorRegistry>,
    pub response_cache: Arc<ResponseCache>,
    pub security_logger: SecurityLogger,
    pub started_at_ms: u64,
}

impl AppState {
    /// Build every store from `config`, with the HTTP identity verifier when configured
    pub fn new(config: &EdgeNodeConfig) -> GuardResult<Self> {
        let verifier = match &config.identity_provider {
            Some(idp) if config.is_identity_provider_configured() => {
                let verifier: Arc<dyn IdentityVerifier> = Arc::new(HttpIdentityVerifier::new(idp)?);
                Some(verifier)
            }
            _ => None,
        };
        Ok(Self::with_identity_verifier(config, verifier))
    }

    /// Build every store with an explicit identity verifier
    pub fn with_identity_verifier(
        config: &EdgeNodeConfig,
        verifier: Option<Arc<dyn IdentityVerifier>>,
    ) -> Self {
        let guard_config = config.guard_config();

        let bootstrap_ledger = Arc::new(NonceLedger::from_config("bootstrap", &guard_config.replay));
        let request_ledger = Arc::new(NonceLedger::from_config("request", &guard_config.replay));

        let handshake = Arc::new(BootstrapHandshake::new(
            BootstrapCredentials {
                api_key: config.api_key.clone(),
                app_identifier: config.app_identifier.clone(),
                signing_secret: config.signing_secret.clone(),
            },
            Arc::clone(&bootstrap_ledger),
            guard_config.freshness.clone(),
        ));
        let signature_guard = Arc::new(RequestSignatureGuard::new(
            config.signing_secret.clone(),
            Arc::clone(&request_ledger),
            &guard_config,
            config.trust_forwarded_for,
        ));

        let token_cache = verifier.map(|verifier| {
            Arc::new(FederatedTokenCache::new(
                verifier,
                Duration::from_millis(guard_config.token_cache.ttl_ms),
            ))
        });
        if token_cache.is_none() {
            warn!("No identity provider configured: request signatures are the only trust boundary");
        }

        Self {
            trust_forwarded_for: config.trust_forwarded_for,
            bootstrap_ledger,
            request_ledger,
            handshake,
            signature_guard,
            token_cache,
            rate_limiter: Arc::new(RateLimiter::new()),
            actor_registry: Arc::new(SuspiciousActorRegistry::new(guard_config.escalation.clone())),
            response_cache: Arc::new(ResponseCache::new(Duration::from_millis(
                guard_config.response_cache.default_ttl_ms,
            ))),
            security_logger: SecurityLogger::new(guard_config.security_logging.clone()),
            started_at_ms: now_millis(),
            guard_config,
        }
    }

    /// Start one sweep task per store. Must be called inside a tokio runtime.
    pub fn start_sweepers(&self) -> SweepGroup {
        let config = &self.guard_config;
        let mut sweepers = SweepGroup::new();
        sweepers.start(Arc::clone(&self.bootstrap_ledger), config.replay.sweep_interval());
        sweepers.start(Arc::clone(&self.request_ledger), config.replay.sweep_interval());
        sweepers.start(Arc::clone(&self.rate_limiter), config.rate_limiting.sweep_interval());
        sweepers.start(Arc::clone(&self.actor_registry), config.escalation.sweep_interval());
        if let Some(cache) = &self.token_cache {
            sweepers.start(Arc::clone(cache), config.token_cache.sweep_interval());
        }
        sweepers.start(Arc::clone(&self.response_cache), config.response_cache.sweep_interval());
        sweepers
    }

    /// Outermost gate for the whole application
    pub fn actor_gate(&self) -> SuspiciousActorGate {
        SuspiciousActorGate::new(
            Arc::clone(&self.actor_registry),
            &self.guard_config,
            self.trust_forwarded_for,
        )
    }
}

/// Mount the edge routes and their gate chains.
///
/// Gates on `/api/ai` run in order: signature guard, token gate, then the ai rate limit.
/// Actix applies the last `wrap` first, hence the reversed order below.
pub fn configure_routes(cfg: &mut web::ServiceConfig, state: &web::Data<AppState>) {
    let guard = &state.guard_config;
    let trust = state.trust_forwarded_for;

    cfg.route(
        "/api/system/status",
        web::get().to(system_routes::get_system_status),
    )
    .service(
        web::resource("/api/auth/bootstrap")
            .wrap(RateLimitMiddleware::new(
                RateLimitFlow::Auth,
                Arc::clone(&state.rate_limiter),
                Arc::clone(&state.actor_registry),
                guard,
                trust,
            ))
            .route(web::post().to(bootstrap_routes::bootstrap)),
    )
    .service(
        web::scope("/api/ai")
            .wrap(RateLimitMiddleware::new(
                RateLimitFlow::Ai,
                Arc::clone(&state.rate_limiter),
                Arc::clone(&state.actor_registry),
                guard,
                trust,
            ))
            .wrap(FederatedTokenGate::new(state.token_cache.clone(), guard, trust))
            .wrap(SignatureGuardMiddleware::new(Arc::clone(&state.signature_guard)))
            .route("/echo", web::post().to(ai_routes::echo)),
    );
}

fn build_cors(allowed_origins: &[String]) -> Cors {
    let cors = Cors::default()
        .allowed_methods(vec!["GET", "POST"])
        .allow_any_header()
        .expose_headers(vec![
            "X-RateLimit-Limit",
            "X-RateLimit-Remaining",
            "X-RateLimit-Reset",
        ])
        .max_age(3600);

    if allowed_origins.iter().any(|origin| origin == "*") {
        return cors.allow_any_origin();
    }
    allowed_origins
        .iter()
        .fold(cors, |cors, origin| cors.allowed_origin(origin))
}

impl EdgeHttpServer {
    /// Create a new HTTP server from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns a `GuardError` if the identity provider client cannot be built.
    pub fn new(config: EdgeNodeConfig) -> GuardResult<Self> {
        let state = web::Data::new(AppState::new(&config)?);
        info!("Edge node configured: {}", state.guard_config.summary());
        Ok(Self { config, state })
    }

    pub fn state(&self) -> &web::Data<AppState> {
        &self.state
    }

    /// Run the HTTP server until it shuts down, then stop every sweep task.
    ///
    /// # Errors
    ///
    /// Returns a `GuardError` if:
    /// * There is an error binding to the configured address
    /// * The server exits with an error
    pub async fn run(&self) -> GuardResult<()> {
        info!("HTTP server running on {}", self.config.bind_address);

        let mut sweepers = self.state.start_sweepers();
        info!("Started {} store sweep tasks", sweepers.len());

        let state = self.state.clone();
        let allowed_origins = self.config.allowed_origins.clone();
        let server = ActixHttpServer::new(move || {
            let routes_state = state.clone();
            App::new()
                .wrap(state.actor_gate())
                .wrap(build_cors(&allowed_origins))
                .wrap(Logger::default())
                .app_data(state.clone())
                .configure(move |cfg| configure_routes(cfg, &routes_state))
        })
        .bind(&self.config.bind_address)
        .map_err(|e| GuardError::Config(format!("Failed to bind HTTP server: {}", e)))?
        .run();

        let result = server.await;
        sweepers.stop_all();
        info!("HTTP server stopped, sweep tasks cancelled");

        result.map_err(|e| {
            error!("HTTP server error: {}", e);
            GuardError::Io(e)
        })
    }
}
