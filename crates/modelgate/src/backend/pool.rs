//! Connection pool: one keep-alive `reqwest::Client` per backend, plus the
//! [`BackendCaller`] seam tests substitute with a deterministic fake.

use async_trait::async_trait;
use dashmap::DashMap;
use modelgate_kernel::backend::BackendDescriptor;
use modelgate_kernel::error::DispatchError;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

/// A raw upstream call result before it is classified into a [`DispatchError`]
/// or accepted as a successful response body.
pub struct RawResponse {
    pub status: u16,
    pub body: Value,
}

/// Abstracts the actual network call so the dispatcher, batcher, and health
/// aggregator can all be tested against an in-memory fake instead of real
/// sockets — the concrete form of the "tests instantiate fresh cores with
/// mock backends" design note.
#[async_trait]
pub trait BackendCaller: Send + Sync {
    async fn call(
        &self,
        backend: &BackendDescriptor,
        payload: &Value,
    ) -> Result<RawResponse, DispatchError>;
}

/// Real HTTP implementation, one pooled `reqwest::Client` per backend id.
pub struct ConnectionPool {
    clients: DashMap<String, Client>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        ConnectionPool {
            clients: DashMap::new(),
        }
    }

    fn client_for(&self, backend: &BackendDescriptor) -> Client {
        if let Some(c) = self.clients.get(&backend.id) {
            return c.clone();
        }
        let client = Client::builder()
            .timeout(backend.request_timeout)
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .expect("failed to build reqwest client");
        self.clients.insert(backend.id.clone(), client.clone());
        client
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendCaller for ConnectionPool {
    #[instrument(skip(self, payload), fields(backend = %backend.id))]
    async fn call(
        &self,
        backend: &BackendDescriptor,
        payload: &Value,
    ) -> Result<RawResponse, DispatchError> {
        let client = self.client_for(backend);
        debug!(url = %backend.base_url, "forwarding to backend");

        let resp = client
            .post(&backend.base_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::Timeout
                } else {
                    DispatchError::Transport(e.to_string())
                }
            })?;

        let status = resp.status().as_u16();
        let body_bytes = resp
            .bytes()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        if status >= 500 {
            let details = serde_json::from_slice(&body_bytes).ok();
            return Err(DispatchError::UpstreamServer { status, details });
        }
        if status >= 400 {
            let details = serde_json::from_slice(&body_bytes).ok();
            return Err(DispatchError::UpstreamClient { status, details });
        }

        let body: Value = serde_json::from_slice(&body_bytes).map_err(|_| DispatchError::MalformedResponse {
            details: Some(Value::String(String::from_utf8_lossy(&body_bytes).to_string())),
        })?;

        Ok(RawResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelgate_kernel::capability::Capability;

    fn backend() -> BackendDescriptor {
        BackendDescriptor {
            id: "llm-1".into(),
            capability: Capability::LlmCompletion,
            base_url: "http://127.0.0.1:1".into(),
            weight: 1,
            max_in_flight: 4,
            request_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn unreachable_backend_reports_transport_error() {
        let pool = ConnectionPool::new();
        let result = pool.call(&backend(), &serde_json::json!({})).await;
        assert!(matches!(
            result,
            Err(DispatchError::Transport(_)) | Err(DispatchError::Timeout)
        ));
    }
}
