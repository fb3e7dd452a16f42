//! `GET /jobs/{id}`, `GET /jobs?status=&capability=&limit=&offset=`, `DELETE /jobs/{id}`.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use modelgate_kernel::capability::Capability;
use modelgate_kernel::error::DispatchError;
use modelgate_kernel::job::{JobId, JobStatus};
use serde::Deserialize;

pub async fn get_job(State(state): State<AppState>, Path(id): Path<JobId>) -> ApiResult<impl IntoResponse> {
    let job = state
        .dispatcher
        .get(id)
        .await
        .ok_or_else(|| ApiError(DispatchError::JobNotFound(id.to_string())))?;
    Ok(Json(job))
}

#[derive(Deserialize)]
pub struct ListJobsQuery {
    status: Option<String>,
    capability: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

fn parse_status(s: &str) -> Option<JobStatus> {
    match s {
        "queued" => Some(JobStatus::Queued),
        "admitted" => Some(JobStatus::Admitted),
        "running" => Some(JobStatus::Running),
        "succeeded" => Some(JobStatus::Succeeded),
        "failed" => Some(JobStatus::Failed),
        "cancelled" => Some(JobStatus::Cancelled),
        _ => None,
    }
}

pub async fn list_jobs(State(state): State<AppState>, Query(q): Query<ListJobsQuery>) -> impl IntoResponse {
    let status_filter = q.status.as_deref().and_then(parse_status);
    let capability_filter: Option<Capability> = q.capability.as_deref().and_then(Capability::from_str_ci);

    let mut jobs = state.dispatcher.list().await;
    jobs.retain(|j| {
        status_filter.map(|s| j.status == s).unwrap_or(true)
            && capability_filter.map(|c| j.capability == c).unwrap_or(true)
    });
    jobs.sort_by_key(|j| j.created_at);

    let offset = q.offset.unwrap_or(0);
    let limit = q.limit.unwrap_or(jobs.len());
    let page: Vec<_> = jobs.into_iter().skip(offset).take(limit).collect();
    Json(page)
}

pub async fn cancel_job(State(state): State<AppState>, Path(id): Path<JobId>) -> ApiResult<impl IntoResponse> {
    state.dispatcher.cancel(id).await.map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({ "cancelled": id })))
}
