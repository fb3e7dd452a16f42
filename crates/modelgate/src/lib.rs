//! ModelGate — AI orchestration gateway.
//!
//! A dispatcher/job control plane sitting in front of a fleet of opaque AI
//! backend HTTP services. Resolves capability requests to backends, admits
//! them under a concurrency budget, batches and caches where safe, and
//! tracks every request as a Job through to completion.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ai/llm/completion` | Submit an `llm_completion` request as a Job. |
//! | `POST` | `/ai/llm/chat` | Submit an `llm_chat` request as a Job. |
//! | `POST` | `/ai/vision/analyze` | Submit a `vision_analyze` request as a Job. |
//! | `POST` | `/ai/nlp/process` | Submit an `nlp_analyze` request as a Job. |
//! | `POST` | `/data/process` | Submit a `data_process` request as a Job. |
//! | `GET`  | `/jobs?status=&capability=&limit=&offset=` | Paginated, filterable job list. |
//! | `GET`  | `/jobs/{id}` | Fetch one job's current state. |
//! | `DELETE` | `/jobs/{id}` | Request best-effort cancellation, idempotently. |
//! | `GET`  | `/health` | Liveness probe and backend health summary. |
//! | `GET`  | `/health/comprehensive` | Liveness plus per-backend health, queue depth, cache stats. |
//! | `GET`  | `/metrics` | Prometheus text exposition. |
//! | `GET`  | `/admin/backends` | List registered backends and live health. |
//! | `POST` | `/admin/backends/{id}/drain` | Force a backend Unhealthy. |

pub mod admission;
pub mod backend;
pub mod batch;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod health;
pub mod job;
pub mod metrics;
pub mod server;
pub mod state;

pub use dispatcher::Dispatcher;
pub use error::{ApiError, ApiResult};
pub use server::{build_app, Background};
