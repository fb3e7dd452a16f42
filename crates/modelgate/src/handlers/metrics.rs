//! `GET /metrics` — Prometheus text exposition.

use crate::state::AppState;
use axum::extract::State;
use axum::response::IntoResponse;

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}
