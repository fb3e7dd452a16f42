//! Runtime error taxonomy for the dispatch path.
//!
//! [`DispatchError`] is the single vocabulary every component in this
//! workspace uses to report a failed operation. It carries a stable,
//! machine-readable [`kind`](DispatchError::kind) and a human message, plus
//! an optional `details` payload for backend-supplied context. The message
//! never absorbs `details` — callers that scrape the `Display` output for
//! alerting must see a stable string regardless of what an upstream backend
//! returned.

use serde_json::Value;
use thiserror::Error;

/// Runtime failure of a dispatch operation.
///
/// Mirrors the error table in the specification: each variant maps to
/// exactly one external HTTP status in the gateway's response layer.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("admission queue is full")]
    Overloaded,

    #[error("no healthy backend available for this capability")]
    NoBackendAvailable,

    #[error("deadline elapsed before completion")]
    Timeout,

    #[error("backend rejected the request")]
    UpstreamClient {
        status: u16,
        details: Option<Value>,
    },

    #[error("backend returned a server error")]
    UpstreamServer {
        status: u16,
        details: Option<Value>,
    },

    #[error("backend returned an unparseable response")]
    MalformedResponse { details: Option<Value> },

    #[error("job was cancelled")]
    Cancelled,

    #[error("internal invariant violation: {0}")]
    Internal(String),

    /// Connection could not be established or broken mid-flight. Retryable.
    #[error("transport error: {0}")]
    Transport(String),
}

impl DispatchError {
    /// Stable, machine-readable kind, used in `errors_total{kind}` and in the
    /// `kind` field of the northbound error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::InvalidRequest(_) => "invalid_request",
            DispatchError::JobNotFound(_) => "job_not_found",
            DispatchError::Overloaded => "overloaded",
            DispatchError::NoBackendAvailable => "no_backend_available",
            DispatchError::Timeout => "timeout",
            DispatchError::UpstreamClient { .. } => "upstream_client",
            DispatchError::UpstreamServer { .. } => "upstream_server",
            DispatchError::MalformedResponse { .. } => "malformed_response",
            DispatchError::Cancelled => "cancelled",
            DispatchError::Internal(_) => "internal",
            DispatchError::Transport(_) => "transport",
        }
    }

    /// Whether the Job Manager should retry this failure per spec §4.3:
    /// only `Timeout`, `Transport`, and `UpstreamServer` are locally
    /// recoverable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::Timeout
                | DispatchError::Transport(_)
                | DispatchError::UpstreamServer { .. }
        )
    }

    pub fn details(&self) -> Option<&Value> {
        match self {
            DispatchError::UpstreamClient { details, .. }
            | DispatchError::UpstreamServer { details, .. }
            | DispatchError::MalformedResponse { details } => details.as_ref(),
            _ => None,
        }
    }
}
