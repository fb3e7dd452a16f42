//! Capability-specific submission endpoints (spec §6): `POST /ai/llm/completion`,
//! `POST /ai/llm/chat`, `POST /ai/vision/analyze`, `POST /ai/nlp/process`,
//! `POST /data/process`. Each decodes its capability's bare request body (no
//! `capability` tag — the route itself names it), dispatches, and waits up
//! to a short window for a result before falling back to a poll-by-id reply.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use modelgate_kernel::capability::{
    CapabilityRequest, DataProcessRequest, LlmChatRequest, LlmCompletionRequest, NlpProcessRequest,
    VisionAnalyzeRequest,
};
use modelgate_kernel::job::JobRecord;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// How long a submission handler blocks hoping for a terminal result before
/// falling back to `{status: "queued"|"running"}` (spec §6).
const WAIT_FOR_RESULT: Duration = Duration::from_secs(5);

async fn dispatch_and_envelope(state: AppState, request: CapabilityRequest, allow_cache: bool) -> ApiResult<impl IntoResponse> {
    let job_id = state
        .dispatcher
        .submit_and_wait(request, allow_cache, WAIT_FOR_RESULT)
        .await
        .map_err(crate::error::ApiError::from)?;

    let envelope = match state.dispatcher.get(job_id).await {
        Some(rec) => envelope_for(job_id, &rec),
        None => json!({ "job_id": job_id, "status": "queued" }),
    };
    Ok(Json(envelope))
}

fn envelope_for(job_id: modelgate_kernel::job::JobId, rec: &JobRecord) -> Value {
    use modelgate_kernel::job::JobStatus;
    match rec.status {
        JobStatus::Succeeded => json!({
            "job_id": job_id,
            "status": "completed",
            "result": rec.result,
            "processing_time": (rec.updated_at - rec.created_at).num_milliseconds(),
        }),
        JobStatus::Failed => json!({
            "job_id": job_id,
            "status": "failed",
            "error": rec.error,
            "processing_time": (rec.updated_at - rec.created_at).num_milliseconds(),
        }),
        JobStatus::Cancelled => json!({
            "job_id": job_id,
            "status": "failed",
            "error": { "kind": "cancelled", "message": "job was cancelled", "details": Value::Null },
        }),
        JobStatus::Running | JobStatus::Admitted => json!({ "job_id": job_id, "status": "running" }),
        JobStatus::Queued => json!({ "job_id": job_id, "status": "queued" }),
    }
}

pub async fn llm_completion(
    State(state): State<AppState>,
    Json(body): Json<LlmCompletionRequestBody>,
) -> ApiResult<impl IntoResponse> {
    dispatch_and_envelope(state, CapabilityRequest::LlmCompletion(body.inner), body.allow_cache).await
}

pub async fn llm_chat(State(state): State<AppState>, Json(body): Json<LlmChatRequestBody>) -> ApiResult<impl IntoResponse> {
    dispatch_and_envelope(state, CapabilityRequest::LlmChat(body.inner), body.allow_cache).await
}

pub async fn vision_analyze(
    State(state): State<AppState>,
    Json(body): Json<VisionAnalyzeRequestBody>,
) -> ApiResult<impl IntoResponse> {
    dispatch_and_envelope(state, CapabilityRequest::VisionAnalyze(body.inner), body.allow_cache).await
}

pub async fn nlp_process(
    State(state): State<AppState>,
    Json(body): Json<NlpProcessRequestBody>,
) -> ApiResult<impl IntoResponse> {
    dispatch_and_envelope(state, CapabilityRequest::NlpAnalyze(body.inner), body.allow_cache).await
}

pub async fn data_process(
    State(state): State<AppState>,
    Json(body): Json<DataProcessRequestBody>,
) -> ApiResult<impl IntoResponse> {
    dispatch_and_envelope(state, CapabilityRequest::DataProcess(body.inner), body.allow_cache).await
}

// Each body type flattens its capability's own fields plus the shared
// `allow_cache` knob, so `POST /ai/llm/completion`'s JSON stays exactly
// `{prompt, max_tokens, temperature, model?, allow_cache?}` per spec §6,
// with no `capability` discriminant for the caller to supply.
macro_rules! capability_body {
    ($name:ident, $inner:ty) => {
        #[derive(Deserialize)]
        pub struct $name {
            #[serde(flatten)]
            pub inner: $inner,
            #[serde(default)]
            pub allow_cache: bool,
        }
    };
}

capability_body!(LlmCompletionRequestBody, LlmCompletionRequest);
capability_body!(LlmChatRequestBody, LlmChatRequest);
capability_body!(VisionAnalyzeRequestBody, VisionAnalyzeRequest);
capability_body!(NlpProcessRequestBody, NlpProcessRequest);
capability_body!(DataProcessRequestBody, DataProcessRequest);
