use actix_web::{web, HttpResponse, Responder};
use serde_json::json;

use crate::edge_node::clock::now_millis;
use crate::edge_node::http_server::AppState;

/// Get edge node status and store sizes
pub async fn get_system_status(state: web::Data<AppState>) -> impl Responder {
    let now = now_millis();
    let token_cache = state.token_cache.as_ref().map(|cache| {
        json!({
            "entries": cache.len(),
            "provider_calls": cache.provider_calls(),
        })
    });

    HttpResponse::Ok().json(json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": now.saturating_sub(state.started_at_ms) / 1000,
        "nonce_ledgers": {
            "bootstrap": state.bootstrap_ledger.stats_at(now),
            "request": state.request_ledger.stats_at(now),
        },
        "rate_counters": state.rate_limiter.tracked_keys(),
        "suspicious_actors": {
            "tracked": state.actor_registry.tracked_actors(),
            "blocked": state.actor_registry.blocked_count_at(now),
        },
        "token_cache": token_cache,
        "response_cache": { "entries": state.response_cache.len() },
    }))
}
