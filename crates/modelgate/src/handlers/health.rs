//! `GET /health` (liveness) and `GET /health/comprehensive` (spec §6).

use crate::state::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use modelgate_kernel::registry::Router;
use serde_json::json;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let backends = state.router.snapshot();
    let all_healthy = backends.iter().all(|b| b.health.is_accepting());
    let services: serde_json::Map<String, serde_json::Value> = backends
        .iter()
        .map(|b| (b.id.clone(), json!({ "status": b.health.as_str() })))
        .collect();
    Json(json!({
        "status": if all_healthy { "ok" } else { "degraded" },
        "services": services,
    }))
}

/// Liveness plus per-backend health, queue depth, and cache occupancy.
pub async fn health_comprehensive(State(state): State<AppState>) -> impl IntoResponse {
    let backends = state.router.snapshot();
    let all_healthy = backends.iter().all(|b| b.health.is_accepting());
    Json(json!({
        "status": if all_healthy { "ok" } else { "degraded" },
        "backends": backends,
        "queue": { "global_pending": state.admission.pending() },
        "cache": { "entries": state.dispatcher.cache_entries() },
    }))
}
