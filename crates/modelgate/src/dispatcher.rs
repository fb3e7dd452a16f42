//! Dispatcher facade (spec §4.7): the single entry point composing the
//! registry/router, connection pool, job manager, batcher, response cache,
//! and admission controller into the nine-step submit algorithm.
//!
//! Plays the role `proxy_handler` plays in the teacher's `server.rs`,
//! generalized from "one static backend, one pipeline pass" to
//! "resolve -> admit -> call -> retry-with-reselection -> settle".

use crate::admission::AdmissionController;
use crate::backend::pool::BackendCaller;
use crate::batch::Batcher;
use crate::cache::{fingerprint, CacheLookup, ResponseCache};
use crate::job::JobManager;
use crate::metrics::Metrics;
use dashmap::DashMap;
use modelgate_kernel::backend::BackendId;
use modelgate_kernel::capability::CapabilityRequest;
use modelgate_kernel::error::DispatchError;
use modelgate_kernel::job::{AttemptOutcome, JobId, JobRecord, JobStatus};
use modelgate_kernel::registry::Router;
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};
use tracing::{info, instrument, warn};

/// Exponential backoff with full jitter (spec §4.3): base 2, 50ms initial,
/// capped at 2s. `attempt` is 0-indexed, so the first retry waits up to 50ms
/// and the wait only grows on subsequent ones.
fn backoff_duration(attempt: u32) -> Duration {
    let capped_ms = 50u64.saturating_mul(1u64 << attempt.min(10)).min(2000);
    let jitter_ms = rand::thread_rng().gen_range(0..=capped_ms);
    Duration::from_millis(jitter_ms)
}

pub struct Dispatcher {
    router: Arc<dyn Router>,
    caller: Arc<dyn BackendCaller>,
    jobs: Arc<JobManager>,
    cache: Arc<ResponseCache>,
    admission: Arc<AdmissionController>,
    batcher: Arc<Batcher>,
    metrics: Arc<Metrics>,
    retry_max_attempts: u32,
    /// One cancellation signal per in-flight job, raced against the batch
    /// seal wait and the outbound backend call so `cancel()` aborts
    /// promptly instead of only marking the record Cancelled once the
    /// backend eventually answers.
    cancellations: DashMap<JobId, Arc<Notify>>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router: Arc<dyn Router>,
        caller: Arc<dyn BackendCaller>,
        jobs: Arc<JobManager>,
        cache: Arc<ResponseCache>,
        admission: Arc<AdmissionController>,
        batcher: Arc<Batcher>,
        metrics: Arc<Metrics>,
        retry_max_attempts: u32,
    ) -> Self {
        Dispatcher {
            router,
            caller,
            jobs,
            cache,
            admission,
            batcher,
            metrics,
            retry_max_attempts,
            cancellations: DashMap::new(),
        }
    }

    /// Submit a request and run it to completion before returning, yielding
    /// its terminal `JobId`. See [`Dispatcher::submit_inner`] for the
    /// nine-step algorithm.
    #[instrument(skip(self, request))]
    pub async fn submit(&self, request: CapabilityRequest, allow_cache: bool) -> Result<JobId, DispatchError> {
        self.submit_inner(request, allow_cache, None).await
    }

    /// Submit a request and return as soon as either the job reaches a
    /// terminal state or `wait` elapses, whichever comes first (spec §6's
    /// northbound wait-for-result window). The job itself always runs to
    /// completion in the background regardless of which happens first; this
    /// only governs how long the HTTP handler blocks before falling back to
    /// a `job_id` the caller polls.
    pub async fn submit_and_wait(
        self: &Arc<Self>,
        request: CapabilityRequest,
        allow_cache: bool,
        wait: Duration,
    ) -> Result<JobId, DispatchError> {
        request.validate()?;

        let (announce_tx, announce_rx) = oneshot::channel();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _ = this.submit_inner(request, allow_cache, Some(announce_tx)).await;
        });
        let job_id = announce_rx
            .await
            .map_err(|_| DispatchError::Internal("job was not created".into()))?;

        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(rec) = self.jobs.get(job_id).await {
                if rec.status.is_terminal() {
                    break;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(job_id)
    }

    /// Implements the nine-step submit algorithm: (1) validate, (2) create
    /// the job, (3) decide cacheability, (4) probe the cache / join an
    /// in-flight leader, (5) resolve a backend excluding none, (6) admit,
    /// (7) call with retry-and-reselect on retryable failure, (8) record the
    /// outcome on the job, (9) settle the cache if this call was the leader.
    /// `announce`, when set, is fired with the `JobId` the moment the job is
    /// created, before any of the above runs — used by
    /// [`Dispatcher::submit_and_wait`] to hand the id back to its caller
    /// without waiting for the job to finish.
    async fn submit_inner(
        &self,
        request: CapabilityRequest,
        allow_cache: bool,
        announce: Option<oneshot::Sender<JobId>>,
    ) -> Result<JobId, DispatchError> {
        request.validate()?;

        let capability = request.capability();
        let cap_label = capability.as_str();
        let cacheable = allow_cache || request.is_pure_by_default();
        let fp = if cacheable { Some(fingerprint(&request)) } else { None };
        let started = Instant::now();

        let job_id = self.jobs.create(request.clone(), allow_cache);
        self.metrics.jobs_queued.inc();
        let cancel_notify = Arc::new(Notify::new());
        self.cancellations.insert(job_id, Arc::clone(&cancel_notify));
        if let Some(tx) = announce {
            let _ = tx.send(job_id);
        }

        if let Some(fp) = fp {
            match self.cache.lookup_or_lead(fp) {
                CacheLookup::Hit(value) => {
                    self.jobs.transition(job_id, JobStatus::Admitted).await?;
                    self.metrics.jobs_queued.dec();
                    self.jobs.transition(job_id, JobStatus::Running).await?;
                    self.metrics.jobs_running.inc();
                    self.jobs.complete(job_id, value).await?;
                    self.cache.release(fp);
                    self.metrics.jobs_running.dec();
                    self.metrics.requests_total.with_label_values(&[cap_label, "succeeded"]).inc();
                    self.metrics
                        .request_duration_seconds
                        .with_label_values(&[cap_label])
                        .observe(started.elapsed().as_secs_f64());
                    self.cancellations.remove(&job_id);
                    return Ok(job_id);
                }
                CacheLookup::Join(mut rx) => {
                    self.jobs.transition(job_id, JobStatus::Admitted).await?;
                    self.metrics.jobs_queued.dec();
                    self.jobs.transition(job_id, JobStatus::Running).await?;
                    self.metrics.jobs_running.inc();
                    match rx.recv().await {
                        Ok(Ok(value)) => {
                            self.jobs.complete(job_id, value).await?;
                            self.metrics.requests_total.with_label_values(&[cap_label, "succeeded"]).inc();
                        }
                        Ok(Err(reason)) => {
                            let err = DispatchError::Internal(reason);
                            self.jobs.fail(job_id, &err).await?;
                            self.metrics.requests_total.with_label_values(&[cap_label, "failed"]).inc();
                        }
                        Err(_) => {
                            let err = DispatchError::Internal("cache leader dropped".into());
                            self.jobs.fail(job_id, &err).await?;
                            self.metrics.requests_total.with_label_values(&[cap_label, "failed"]).inc();
                        }
                    }
                    self.metrics.jobs_running.dec();
                    self.metrics
                        .request_duration_seconds
                        .with_label_values(&[cap_label])
                        .observe(started.elapsed().as_secs_f64());
                    self.cancellations.remove(&job_id);
                    return Ok(job_id);
                }
                CacheLookup::Lead => {
                    // fall through: this call is the leader and must settle below.
                }
            }
        }

        self.jobs.transition(job_id, JobStatus::Admitted).await?;
        self.metrics.jobs_queued.dec();

        // Batchable capabilities wait for their BatchGroup to seal (by size,
        // deadline, or immediate bypass) before a single Job proceeds to
        // resolve/admit/call — a dropped sender (sealing task panicked) is
        // treated the same as an immediate release, not a hang. A
        // cancellation observed during the wait skips dispatch entirely.
        let (seal_rx, _) = self.batcher.join(capability, request.bucket_key(), job_id).await;
        let cancelled_before_seal = tokio::select! {
            _ = seal_rx => false,
            _ = cancel_notify.notified() => true,
        };

        let result = if cancelled_before_seal {
            Err(DispatchError::Cancelled)
        } else {
            self.metrics.jobs_running.inc();
            let r = self.run_with_retry(capability, &request, job_id, &cancel_notify).await;
            self.metrics.jobs_running.dec();
            r
        };

        match &result {
            Ok(value) => {
                if self.jobs.complete(job_id, value.clone()).await.is_ok() {
                    if let Some(fp) = fp {
                        self.cache.settle(fp, value.clone());
                    }
                    self.metrics.requests_total.with_label_values(&[cap_label, "succeeded"]).inc();
                }
            }
            Err(DispatchError::Cancelled) => {
                let _ = self.jobs.transition(job_id, JobStatus::Cancelled).await;
                if let Some(fp) = fp {
                    self.cache.abandon(fp, DispatchError::Cancelled.to_string());
                }
                self.metrics.requests_total.with_label_values(&[cap_label, "cancelled"]).inc();
            }
            Err(e) => {
                if self.jobs.fail(job_id, e).await.is_ok() {
                    if let Some(fp) = fp {
                        self.cache.abandon(fp, e.to_string());
                    }
                    self.metrics.requests_total.with_label_values(&[cap_label, "failed"]).inc();
                    self.metrics.errors_total.with_label_values(&[cap_label, e.kind()]).inc();
                }
            }
        }
        self.metrics
            .request_duration_seconds
            .with_label_values(&[cap_label])
            .observe(started.elapsed().as_secs_f64());
        self.cancellations.remove(&job_id);

        Ok(job_id)
    }

    async fn run_with_retry(
        &self,
        capability: modelgate_kernel::capability::Capability,
        request: &CapabilityRequest,
        job_id: JobId,
        cancel_notify: &Notify,
    ) -> Result<Value, DispatchError> {
        let payload = serde_json::to_value(request).map_err(|e| DispatchError::Internal(e.to_string()))?;
        let mut excluded: Vec<BackendId> = Vec::new();
        let mut last_err = DispatchError::NoBackendAvailable;
        let cap_label = capability.as_str();

        for attempt in 0..self.retry_max_attempts.max(1) {
            let backend = match self.router.resolve(capability, &excluded) {
                Ok(b) => b,
                Err(e) => {
                    last_err = e;
                    break;
                }
            };

            self.jobs.transition(job_id, JobStatus::Running).await.ok();
            self.jobs.begin_attempt(job_id, backend.id.clone()).await.ok();

            let admit_guard = match self.admission.admit(&backend.id).await {
                Ok(g) => g,
                Err(e) => {
                    self.router.release(&backend.id);
                    self.jobs.end_attempt(job_id, AttemptOutcome::Failed { kind: e.kind().into() }).await.ok();
                    return Err(e);
                }
            };

            self.metrics.active_connections.with_label_values(&[&backend.id]).inc();
            let call_result = tokio::select! {
                r = self.caller.call(&backend, &payload) => r,
                _ = cancel_notify.notified() => Err(DispatchError::Cancelled),
            };
            self.metrics.active_connections.with_label_values(&[&backend.id]).dec();
            drop(admit_guard);
            self.router.release(&backend.id);

            match call_result {
                Ok(raw) => {
                    self.jobs.end_attempt(job_id, AttemptOutcome::Success).await.ok();
                    self.metrics.model_inference_total.with_label_values(&[cap_label, "succeeded"]).inc();
                    info!(backend = %backend.id, attempt, "dispatch succeeded");
                    return Ok(raw.body);
                }
                Err(DispatchError::Cancelled) => {
                    self.jobs
                        .end_attempt(job_id, AttemptOutcome::Failed { kind: "cancelled".into() })
                        .await
                        .ok();
                    return Err(DispatchError::Cancelled);
                }
                Err(e) => {
                    self.jobs
                        .end_attempt(job_id, AttemptOutcome::Failed { kind: e.kind().into() })
                        .await
                        .ok();
                    self.metrics.model_inference_total.with_label_values(&[cap_label, "failed"]).inc();
                    warn!(backend = %backend.id, attempt, error = %e, "attempt failed");
                    let retryable = e.is_retryable();
                    last_err = e;
                    excluded.push(backend.id.clone());
                    if !retryable {
                        break;
                    }

                    // Suspension point (spec §5e): cancellable jittered backoff
                    // before the next reselect-and-retry pass.
                    let wait = backoff_duration(attempt);
                    let cancelled = tokio::select! {
                        _ = tokio::time::sleep(wait) => false,
                        _ = cancel_notify.notified() => true,
                    };
                    if cancelled {
                        return Err(DispatchError::Cancelled);
                    }
                }
            }
        }

        Err(last_err)
    }

    pub async fn get(&self, job_id: JobId) -> Option<JobRecord> {
        self.jobs.get(job_id).await
    }

    pub async fn list(&self) -> Vec<JobRecord> {
        self.jobs.list().await
    }

    /// Snapshot of response cache occupancy, for `GET /health/comprehensive`.
    pub fn cache_entries(&self) -> usize {
        self.cache.len()
    }

    /// Cancel a job. Idempotent: cancelling an already-terminal job is a
    /// no-op success rather than an error. For a job still in flight, wakes
    /// whichever `tokio::select!` it is parked in (batch-seal wait or
    /// backend call) via its registered `Notify`, then applies the status
    /// transition directly as a fallback in case `submit()` has not yet
    /// reached a point where it observes the notification.
    pub async fn cancel(&self, job_id: JobId) -> Result<(), DispatchError> {
        let job = self.jobs.get(job_id).await.ok_or_else(|| DispatchError::JobNotFound(job_id.to_string()))?;
        if job.status.is_terminal() {
            return Ok(());
        }
        if let Some(notify) = self.cancellations.get(&job_id) {
            notify.notify_one();
        }
        let _ = self.jobs.transition(job_id, JobStatus::Cancelled).await;
        Ok(())
    }
}
