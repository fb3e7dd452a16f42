//! Axum-based HTTP server wiring (spec §6's northbound table).
//!
//! [`build_app`] wires routes to `with_state` the way the teacher's
//! `GatewayServer::build_app` does, generalized from one proxy route to the
//! dispatch/job/admin surface this specification names.

use crate::admission::AdmissionController;
use crate::backend::{BackendCaller, BackendRegistry, ConnectionPool};
use crate::batch::Batcher;
use crate::cache::ResponseCache;
use crate::dispatcher::Dispatcher;
use crate::handlers;
use crate::health::HealthAggregator;
use crate::job::{spawn_janitor, JobManager};
use crate::metrics::Metrics;
use crate::state::AppState;
use axum::routing::{delete, get, post};
use axum::Router;
use modelgate_kernel::config::GatewayConfig;
use modelgate_kernel::registry::Router as RouterTrait;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Background handles kept alive for the lifetime of the server; dropping
/// (or aborting) them stops the janitor and health probes.
pub struct Background {
    pub janitor: tokio::task::JoinHandle<()>,
    pub probes: Vec<tokio::task::JoinHandle<()>>,
}

/// Build the fully wired axum [`Router`] plus its background tasks from a
/// validated [`GatewayConfig`].
pub fn build_app(config: &GatewayConfig) -> (Router, Background) {
    config.validate().expect("invalid gateway config");

    let router: Arc<dyn RouterTrait> = Arc::new(BackendRegistry::new());
    for backend in &config.backends {
        router.register(backend.clone());
    }

    let admission = Arc::new(AdmissionController::new(config.global_queue_cap));
    for backend in &config.backends {
        admission.register_backend(backend.id.clone(), backend.max_in_flight);
    }

    let caller: Arc<dyn BackendCaller> = Arc::new(ConnectionPool::new());
    let jobs = Arc::new(JobManager::new(Duration::from_secs(3600)));
    let cache = Arc::new(ResponseCache::with_ttl(config.cache_max_entries, config.cache_ttl));
    let batcher = Arc::new(Batcher::new(config.batch_max_size, config.batch_max_delay));
    let metrics = Arc::new(Metrics::new());

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&router),
        Arc::clone(&caller),
        Arc::clone(&jobs),
        Arc::clone(&cache),
        Arc::clone(&admission),
        Arc::clone(&batcher),
        Arc::clone(&metrics),
        config.retry_max_attempts,
    ));

    let health_aggregator = Arc::new(HealthAggregator::new(
        Arc::clone(&router),
        Arc::clone(&caller),
        Arc::clone(&admission),
        Arc::clone(&metrics),
        config.circuit_breaker_failure_threshold,
        config.circuit_breaker_cooldown,
    ));
    let probes = health_aggregator.spawn_probes(config.backends.clone(), config.health_probe_interval);

    let janitor = spawn_janitor(Arc::clone(&jobs), Duration::from_secs(60));

    let state = AppState {
        dispatcher,
        router,
        admission,
        metrics,
    };

    info!(port = config.listen_port, backends = config.backends.len(), "gateway configured");

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/health/comprehensive", get(handlers::health::health_comprehensive))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/ai/llm/completion", post(handlers::submit::llm_completion))
        .route("/ai/llm/chat", post(handlers::submit::llm_chat))
        .route("/ai/vision/analyze", post(handlers::submit::vision_analyze))
        .route("/ai/nlp/process", post(handlers::submit::nlp_process))
        .route("/data/process", post(handlers::submit::data_process))
        .route("/jobs", get(handlers::jobs::list_jobs))
        .route("/jobs/{id}", get(handlers::jobs::get_job))
        .route("/jobs/{id}", delete(handlers::jobs::cancel_job))
        .route("/admin/backends", get(handlers::admin::list_backends))
        .route("/admin/backends/{id}/drain", post(handlers::admin::drain_backend))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    (app, Background { janitor, probes })
}
