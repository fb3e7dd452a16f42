//! Admin surface (SPEC_FULL supplement): read-only backend inspection and a
//! manual drain endpoint for planned maintenance. Unauthenticated at this
//! layer, consistent with the Non-goal excluding auth middleware —
//! deployments front this service with an external auth layer.

use crate::state::AppState;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use modelgate_kernel::backend::HealthState;
use modelgate_kernel::registry::Router;
use serde_json::json;

pub async fn list_backends(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.router.snapshot())
}

pub async fn drain_backend(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    state.router.update_health(&id, HealthState::Open { retry_after_unix_ms: i64::MAX });
    Json(json!({ "drained": id }))
}
