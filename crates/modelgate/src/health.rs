//! Health aggregator and circuit breaker (spec §4.8).
//!
//! One probe loop per backend, adapted from the `Healthy/Degraded/Unhealthy/
//! Cooldown` lifecycle used for deployment health tracking elsewhere in the
//! corpus — expressed here as an explicit `HealthState` behind a lock rather
//! than a bare atomic, since a transition must change the status and its
//! cooldown timestamp together.

use crate::admission::AdmissionController;
use crate::backend::pool::BackendCaller;
use crate::metrics::Metrics;
use modelgate_kernel::backend::{BackendDescriptor, HealthState};
use modelgate_kernel::registry::Router;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct HealthAggregator {
    router: Arc<dyn Router>,
    caller: Arc<dyn BackendCaller>,
    admission: Arc<AdmissionController>,
    metrics: Arc<Metrics>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl HealthAggregator {
    pub fn new(
        router: Arc<dyn Router>,
        caller: Arc<dyn BackendCaller>,
        admission: Arc<AdmissionController>,
        metrics: Arc<Metrics>,
        failure_threshold: u32,
        cooldown: Duration,
    ) -> Self {
        HealthAggregator {
            router,
            caller,
            admission,
            metrics,
            failure_threshold,
            cooldown,
        }
    }

    /// Spawn one probe loop per backend. Returns the join handles so the
    /// caller can abort them on shutdown.
    pub fn spawn_probes(
        self: &Arc<Self>,
        backends: Vec<BackendDescriptor>,
        interval: Duration,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        backends
            .into_iter()
            .map(|backend| {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.probe_loop(backend, interval).await })
            })
            .collect()
    }

    /// Failure count at which a backend is routed at half capacity rather
    /// than fully excluded (spec §4.6, P4). Always at least 1, so a
    /// `failure_threshold` of 1 still has a (trivial) Degraded tier.
    fn degrade_threshold(&self) -> u32 {
        (self.failure_threshold / 2).max(1)
    }

    /// One task owns one backend's state exclusively, so the breaker state
    /// and its failure counter live as plain loop-local variables rather
    /// than shared atomics — there is never a concurrent writer to race.
    async fn probe_loop(&self, backend: BackendDescriptor, interval: Duration) {
        let mut state = HealthState::Closed;
        let mut consecutive_failures: u32 = 0;
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;

            if let HealthState::Open { retry_after_unix_ms } = state {
                if chrono::Utc::now().timestamp_millis() < retry_after_unix_ms {
                    // Still cooling down: spec §4.8 forbids probing an Open
                    // breaker before its cooldown deadline.
                    continue;
                }
                state = HealthState::HalfOpen { trial_budget: 1 };
                self.router.update_health(&backend.id, state);
            }

            let healthy = self
                .caller
                .call(&backend, &serde_json::json!({"probe": true}))
                .await
                .is_ok();

            match (state, healthy) {
                (HealthState::HalfOpen { .. }, true) => {
                    consecutive_failures = 0;
                    state = HealthState::Closed;
                    self.router.update_health(&backend.id, state);
                    self.admission.restore_backend(&backend.id);
                    self.metrics.backend_health.with_label_values(&[&backend.id]).set(1.0);
                    info!(backend = %backend.id, "trial probe succeeded, circuit closed");
                }
                (HealthState::HalfOpen { .. }, false) => {
                    let retry_after = chrono::Utc::now() + chrono::Duration::from_std(self.cooldown).unwrap_or_default();
                    state = HealthState::Open { retry_after_unix_ms: retry_after.timestamp_millis() };
                    self.router.update_health(&backend.id, state);
                    self.metrics.backend_health.with_label_values(&[&backend.id]).set(0.0);
                    warn!(backend = %backend.id, "trial probe failed, circuit reopened");
                }
                (_, true) => {
                    consecutive_failures = 0;
                    if matches!(state, HealthState::Degraded) {
                        self.admission.restore_backend(&backend.id);
                    }
                    state = HealthState::Closed;
                    self.router.update_health(&backend.id, state);
                    self.metrics.backend_health.with_label_values(&[&backend.id]).set(1.0);
                }
                (_, false) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= self.failure_threshold {
                        warn!(backend = %backend.id, consecutive_failures, "circuit breaker opening");
                        let retry_after = chrono::Utc::now() + chrono::Duration::from_std(self.cooldown).unwrap_or_default();
                        state = HealthState::Open { retry_after_unix_ms: retry_after.timestamp_millis() };
                        self.router.update_health(&backend.id, state);
                        self.metrics.backend_health.with_label_values(&[&backend.id]).set(0.0);
                    } else if consecutive_failures >= self.degrade_threshold() && !matches!(state, HealthState::Degraded) {
                        warn!(backend = %backend.id, consecutive_failures, "routing backend at half capacity");
                        self.admission.degrade_backend(&backend.id);
                        state = HealthState::Degraded;
                        self.router.update_health(&backend.id, state);
                        self.metrics.backend_health.with_label_values(&[&backend.id]).set(0.5);
                    } else if matches!(state, HealthState::Degraded) {
                        self.metrics.backend_health.with_label_values(&[&backend.id]).set(0.5);
                    }
                }
            }
        }
    }
}
