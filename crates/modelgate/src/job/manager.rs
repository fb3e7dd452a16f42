//! In-memory job store with a background retention sweep.

use chrono::Utc;
use dashmap::DashMap;
use modelgate_kernel::capability::CapabilityRequest;
use modelgate_kernel::error::DispatchError;
use modelgate_kernel::job::{AttemptOutcome, AttemptRecord, JobId, JobRecord, JobStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Concurrent map of job id to a lock-guarded record, mirroring the
/// concurrent-map-of-locks shape used for the teacher's agent registry.
pub struct JobManager {
    jobs: DashMap<JobId, Arc<RwLock<JobRecord>>>,
    retention: chrono::Duration,
}

impl JobManager {
    pub fn new(retention: Duration) -> Self {
        JobManager {
            jobs: DashMap::new(),
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::hours(1)),
        }
    }

    pub fn create(&self, request: CapabilityRequest, allow_cache: bool) -> JobId {
        let id = JobId::new_v4();
        let record = JobRecord::new(id, request, allow_cache, Utc::now(), self.retention);
        self.jobs.insert(id, Arc::new(RwLock::new(record)));
        id
    }

    /// A consistent snapshot of the job: callers never observe a
    /// partially-applied transition because the clone happens under the
    /// same read lock as the rest of the fields.
    pub async fn get(&self, id: JobId) -> Option<JobRecord> {
        let handle = self.jobs.get(&id)?.clone();
        let guard = handle.read().await;
        Some(guard.clone())
    }

    pub async fn list(&self) -> Vec<JobRecord> {
        let mut out = Vec::with_capacity(self.jobs.len());
        for kv in self.jobs.iter() {
            out.push(kv.value().read().await.clone());
        }
        out
    }

    pub async fn transition(&self, id: JobId, next: JobStatus) -> Result<(), DispatchError> {
        let handle = self
            .jobs
            .get(&id)
            .ok_or_else(|| DispatchError::Internal(format!("unknown job {id}")))?
            .clone();
        let mut guard = handle.write().await;
        guard.transition(next, Utc::now())
    }

    pub async fn begin_attempt(&self, id: JobId, backend_id: String) -> Result<(), DispatchError> {
        let handle = self
            .jobs
            .get(&id)
            .ok_or_else(|| DispatchError::Internal(format!("unknown job {id}")))?
            .clone();
        let mut guard = handle.write().await;
        guard.attempts.push(AttemptRecord {
            backend_id,
            started_at: Utc::now(),
            ended_at: None,
            outcome: None,
        });
        Ok(())
    }

    pub async fn end_attempt(&self, id: JobId, outcome: AttemptOutcome) -> Result<(), DispatchError> {
        let handle = self
            .jobs
            .get(&id)
            .ok_or_else(|| DispatchError::Internal(format!("unknown job {id}")))?
            .clone();
        let mut guard = handle.write().await;
        if let Some(last) = guard.attempts.last_mut() {
            last.ended_at = Some(Utc::now());
            last.outcome = Some(outcome);
        }
        Ok(())
    }

    pub async fn complete(&self, id: JobId, result: serde_json::Value) -> Result<(), DispatchError> {
        let handle = self
            .jobs
            .get(&id)
            .ok_or_else(|| DispatchError::Internal(format!("unknown job {id}")))?
            .clone();
        let mut guard = handle.write().await;
        guard.result = Some(result);
        guard.transition(JobStatus::Succeeded, Utc::now())
    }

    pub async fn fail(&self, id: JobId, error: &DispatchError) -> Result<(), DispatchError> {
        let handle = self
            .jobs
            .get(&id)
            .ok_or_else(|| DispatchError::Internal(format!("unknown job {id}")))?
            .clone();
        let mut guard = handle.write().await;
        guard.error = Some(error.into());
        guard.transition(JobStatus::Failed, Utc::now())
    }

    /// Sweep jobs whose retention window has elapsed. Run periodically from
    /// a background task, mirroring the teacher's `RateLimiter::gc()`.
    pub fn sweep_expired(&self) {
        let now = Utc::now();
        let before = self.jobs.len();
        self.jobs.retain(|_, handle| {
            handle
                .try_read()
                .map(|g| !(g.status.is_terminal() && g.retention_until < now))
                .unwrap_or(true)
        });
        let removed = before - self.jobs.len();
        if removed > 0 {
            debug!(removed, "swept expired jobs");
        }
    }
}

/// Spawn the periodic janitor task. Returns its `JoinHandle` so callers may
/// abort it on shutdown.
pub fn spawn_janitor(manager: Arc<JobManager>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            manager.sweep_expired();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelgate_kernel::capability::{CapabilityRequest, LlmCompletionRequest};

    fn req() -> CapabilityRequest {
        CapabilityRequest::LlmCompletion(LlmCompletionRequest {
            prompt: "hi".into(),
            max_tokens: None,
            temperature: None,
            model: None,
        })
    }

    #[tokio::test]
    async fn create_and_get_roundtrips() {
        let mgr = JobManager::new(Duration::from_secs(60));
        let id = mgr.create(req(), false);
        let job = mgr.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let mgr = JobManager::new(Duration::from_secs(60));
        let id = mgr.create(req(), false);
        assert!(mgr.transition(id, JobStatus::Running).await.is_err());
    }

    #[tokio::test]
    async fn legal_transition_chain_succeeds() {
        let mgr = JobManager::new(Duration::from_secs(60));
        let id = mgr.create(req(), false);
        mgr.transition(id, JobStatus::Admitted).await.unwrap();
        mgr.transition(id, JobStatus::Running).await.unwrap();
        mgr.complete(id, serde_json::json!({"ok": true})).await.unwrap();
        let job = mgr.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn attempts_are_recorded() {
        let mgr = JobManager::new(Duration::from_secs(60));
        let id = mgr.create(req(), false);
        mgr.begin_attempt(id, "backend-a".into()).await.unwrap();
        mgr.end_attempt(id, AttemptOutcome::Success).await.unwrap();
        let job = mgr.get(id).await.unwrap();
        assert_eq!(job.attempts.len(), 1);
        assert!(job.attempts[0].ended_at.is_some());
    }
}
