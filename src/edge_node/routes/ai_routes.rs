use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use log::debug;
use serde_json::{json, Value};

use crate::edge_node::auth::{AuthenticatedDevice, VerifiedIdentity};
use crate::edge_node::http_server::AppState;
use crate::edge_node::response_cache::ResponseCache;

const CACHE_HEADER: &str = "x-cache";

/// Echo a verified JSON body back to the caller
///
/// Stands in for a proxied provider call. Replies are memoised in the response cache
/// under a fingerprint of the caller, its device and the verified body.
pub async fn echo(req: HttpRequest, state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let user_id = req
        .extensions()
        .get::<VerifiedIdentity>()
        .map(|identity| identity.user_id.clone());
    let device_id = req
        .extensions()
        .get::<AuthenticatedDevice>()
        .and_then(|device| device.device_id.clone());

    let caching = state.guard_config.response_cache.enabled;
    let fingerprint = ResponseCache::fingerprint(
        "ai-echo",
        &[
            user_id.as_deref().unwrap_or("anon").as_bytes(),
            device_id.as_deref().unwrap_or("").as_bytes(),
            body.as_ref(),
        ],
    );
    if caching {
        if let Some(cached) = state.response_cache.get(&fingerprint) {
            debug!("Response cache hit for {}", fingerprint);
            return HttpResponse::Ok()
                .insert_header((CACHE_HEADER, "hit"))
                .json(cached);
        }
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            return HttpResponse::BadRequest().json(json!({
                "error": format!("Request body is not valid JSON: {}", e),
            }))
        }
    };

    let reply = json!({
        "echo": payload,
        "user": user_id,
        "device": device_id,
    });
    if caching {
        state.response_cache.set(&fingerprint, reply.clone(), None);
    }
    HttpResponse::Ok()
        .insert_header((CACHE_HEADER, "miss"))
        .json(reply)
}
