//! End-to-end scenario tests against a fully wired `Dispatcher` with a fake
//! backend — the literal scenarios named in the specification's acceptance
//! examples: cache hit, single-flight coalescing, admission shedding,
//! retry-across-backends, and circuit breaker exclusion.

use async_trait::async_trait;
use modelgate::admission::AdmissionController;
use modelgate::backend::registry::BackendRegistry;
use modelgate::backend::{BackendCaller, RawResponse};
use modelgate::cache::ResponseCache;
use modelgate::dispatcher::Dispatcher;
use modelgate::batch::Batcher;
use modelgate::job::JobManager;
use modelgate::metrics::Metrics;
use modelgate_kernel::backend::{BackendDescriptor, HealthState};
use modelgate_kernel::capability::{Capability, CapabilityRequest, LlmCompletionRequest};
use modelgate_kernel::error::DispatchError;
use modelgate_kernel::job::JobStatus;
use modelgate_kernel::registry::Router;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Deterministic in-memory backend used in place of real sockets, per the
/// design note that tests instantiate fresh cores with mock backends.
struct FakeCaller {
    calls: AtomicUsize,
    /// Backend ids that should fail the next `n` calls with a retryable error.
    fail_backends: Mutex<std::collections::HashMap<String, u32>>,
    /// Artificial delay before every call resolves, long enough for a
    /// concurrent `cancel()` to win the `tokio::select!` race in the
    /// dispatcher.
    call_delay: Duration,
}

impl FakeCaller {
    fn new() -> Self {
        FakeCaller {
            calls: AtomicUsize::new(0),
            fail_backends: Mutex::new(std::collections::HashMap::new()),
            call_delay: Duration::ZERO,
        }
    }

    fn with_delay(delay: Duration) -> Self {
        FakeCaller {
            calls: AtomicUsize::new(0),
            fail_backends: Mutex::new(std::collections::HashMap::new()),
            call_delay: delay,
        }
    }

    async fn fail_next(&self, backend_id: &str, times: u32) {
        self.fail_backends.lock().await.insert(backend_id.to_string(), times);
    }
}

#[async_trait]
impl BackendCaller for FakeCaller {
    async fn call(
        &self,
        backend: &BackendDescriptor,
        payload: &serde_json::Value,
    ) -> Result<RawResponse, DispatchError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }

        let mut guard = self.fail_backends.lock().await;
        if let Some(remaining) = guard.get_mut(&backend.id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DispatchError::UpstreamServer { status: 503, details: None });
            }
        }

        Ok(RawResponse {
            status: 200,
            body: serde_json::json!({ "echo": payload, "backend": backend.id }),
        })
    }
}

fn backend(id: &str, capability: Capability, max_in_flight: usize) -> BackendDescriptor {
    BackendDescriptor {
        id: id.to_string(),
        capability,
        base_url: "http://fake.invalid".into(),
        weight: 1,
        max_in_flight,
        request_timeout: Duration::from_secs(1),
    }
}

fn completion(prompt: &str) -> CapabilityRequest {
    CapabilityRequest::LlmCompletion(LlmCompletionRequest {
        prompt: prompt.to_string(),
        max_tokens: None,
        temperature: Some(0.0),
        model: None,
    })
}

struct Harness {
    dispatcher: Arc<Dispatcher>,
    router: Arc<BackendRegistry>,
    caller: Arc<FakeCaller>,
}

fn build_harness(backends: Vec<BackendDescriptor>, global_queue_cap: usize) -> Harness {
    build_harness_with_caller(backends, global_queue_cap, FakeCaller::new())
}

fn build_harness_with_caller(backends: Vec<BackendDescriptor>, global_queue_cap: usize, caller: FakeCaller) -> Harness {
    let router = Arc::new(BackendRegistry::new());
    for b in &backends {
        router.register(b.clone());
    }
    let admission = Arc::new(AdmissionController::new(global_queue_cap));
    for b in &backends {
        admission.register_backend(b.id.clone(), b.max_in_flight);
    }
    let caller = Arc::new(caller);
    let jobs = Arc::new(JobManager::new(Duration::from_secs(3600)));
    let cache = Arc::new(ResponseCache::new(1000));
    // max_size=1 seals each group on its first (and only) member immediately,
    // so these scenario tests exercise the batcher without paying its
    // wall-clock deadline on every submission.
    let batcher = Arc::new(Batcher::new(1, Duration::from_millis(50)));
    let metrics = Arc::new(Metrics::new());

    let router_trait: Arc<dyn Router> = router.clone();
    let caller_trait: Arc<dyn BackendCaller> = caller.clone();

    let dispatcher = Arc::new(Dispatcher::new(
        router_trait,
        caller_trait,
        jobs,
        cache,
        admission,
        batcher,
        metrics,
        3,
    ));

    Harness { dispatcher, router, caller }
}

#[tokio::test]
async fn cache_hit_skips_a_second_backend_call() {
    let h = build_harness(vec![backend("llm-1", Capability::LlmCompletion, 4)], 16);

    let job1 = h.dispatcher.submit(completion("repeat me"), false).await.unwrap();
    let job2 = h.dispatcher.submit(completion("repeat me"), false).await.unwrap();

    let rec1 = h.dispatcher.get(job1).await.unwrap();
    let rec2 = h.dispatcher.get(job2).await.unwrap();
    assert_eq!(rec1.status, JobStatus::Succeeded);
    assert_eq!(rec2.status, JobStatus::Succeeded);
    assert_eq!(rec1.result, rec2.result);
    assert_eq!(h.caller.calls.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn fifty_concurrent_identical_requests_single_flight_to_one_call() {
    let h = build_harness(vec![backend("llm-1", Capability::LlmCompletion, 50)], 200);

    let mut handles = Vec::new();
    for _ in 0..50 {
        let dispatcher = h.dispatcher.clone();
        handles.push(tokio::spawn(async move {
            dispatcher.submit(completion("same prompt"), false).await.unwrap()
        }));
    }
    for handle in handles {
        let job_id = handle.await.unwrap();
        let rec = h.dispatcher.get(job_id).await.unwrap();
        assert_eq!(rec.status, JobStatus::Succeeded);
    }

    assert_eq!(h.caller.calls.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn admission_sheds_load_past_the_global_queue_cap() {
    // A global_queue_cap of zero leaves no pending headroom: even the first
    // submission must be shed with Overloaded before a backend is ever called.
    let h = build_harness(vec![backend("llm-1", Capability::LlmCompletion, 4)], 0);

    let mut nonzero_temp = completion("not cacheable");
    if let CapabilityRequest::LlmCompletion(ref mut r) = nonzero_temp {
        r.temperature = Some(1.0);
    }

    let job = h.dispatcher.submit(nonzero_temp, false).await.unwrap();
    let rec = h.dispatcher.get(job).await.unwrap();
    assert_eq!(rec.status, JobStatus::Failed);
    assert_eq!(rec.error.as_ref().unwrap().kind, "overloaded");
    assert_eq!(h.caller.calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn retryable_failure_reselects_a_different_backend() {
    let h = build_harness(
        vec![
            backend("llm-1", Capability::LlmCompletion, 4),
            backend("llm-2", Capability::LlmCompletion, 4),
        ],
        16,
    );
    h.caller.fail_next("llm-1", 1).await;

    let job = h.dispatcher.submit(completion("retry me"), true).await.unwrap();
    let rec = h.dispatcher.get(job).await.unwrap();

    assert_eq!(rec.status, JobStatus::Succeeded);
    assert_eq!(rec.attempts.len(), 2);
    assert_eq!(rec.attempts[0].backend_id, "llm-1");
    assert_eq!(rec.attempts[1].backend_id, "llm-2");
}

#[tokio::test]
async fn circuit_open_backend_is_excluded_from_resolution() {
    let h = build_harness(
        vec![
            backend("llm-1", Capability::LlmCompletion, 4),
            backend("llm-2", Capability::LlmCompletion, 4),
        ],
        16,
    );
    h.router.update_health(&"llm-1".to_string(), HealthState::Open { retry_after_unix_ms: i64::MAX });

    let job = h.dispatcher.submit(completion("route around open breaker"), true).await.unwrap();
    let rec = h.dispatcher.get(job).await.unwrap();

    assert_eq!(rec.status, JobStatus::Succeeded);
    assert_eq!(rec.attempts.len(), 1);
    assert_eq!(rec.attempts[0].backend_id, "llm-2");
}

#[tokio::test]
async fn cancellation_aborts_an_in_flight_call() {
    let h = build_harness_with_caller(
        vec![backend("llm-1", Capability::LlmCompletion, 4)],
        16,
        FakeCaller::with_delay(Duration::from_millis(200)),
    );

    let dispatcher = h.dispatcher.clone();
    let mut nonzero_temp = completion("in flight");
    if let CapabilityRequest::LlmCompletion(ref mut r) = nonzero_temp {
        r.temperature = Some(1.0);
    }
    let submit_handle = tokio::spawn(async move { dispatcher.submit(nonzero_temp, false).await.unwrap() });

    // Give submit() time to create the job and reach the backend call
    // before the delayed FakeCaller would otherwise resolve it.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let jobs = h.dispatcher.list().await;
    let job_id = jobs[0].id;
    h.dispatcher.cancel(job_id).await.unwrap();

    let completed_job_id = submit_handle.await.unwrap();
    assert_eq!(completed_job_id, job_id);
    let rec = h.dispatcher.get(job_id).await.unwrap();
    assert_eq!(rec.status, JobStatus::Cancelled);
    assert_eq!(h.caller.calls.load(Ordering::Relaxed), 1);

    // cancel() is idempotent once the job is terminal.
    h.dispatcher.cancel(job_id).await.unwrap();
}

#[tokio::test]
async fn cancelling_an_unknown_job_returns_job_not_found() {
    let h = build_harness(vec![backend("llm-1", Capability::LlmCompletion, 4)], 16);
    let err = h.dispatcher.cancel(uuid::Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.kind(), "job_not_found");
}
