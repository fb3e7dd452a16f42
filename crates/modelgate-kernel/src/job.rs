//! Job state machine (spec §4.3) and the cache fingerprint type (spec §4.5).

use crate::backend::BackendId;
use crate::capability::{Capability, CapabilityRequest};
use crate::error::DispatchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub type JobId = uuid::Uuid;

/// A 128-bit non-cryptographic fingerprint of a cacheable request, built in
/// `modelgate::cache` from [`CapabilityRequest::canonical_fields`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub u128);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// One attempt to satisfy a job against a specific backend.
///
/// **(SUPPLEMENT)** restored from the original implementation's job store;
/// needed to verify the at-most-one-call-per-attempt property and useful to
/// `GET /jobs/{id}` callers inspecting why a job retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub backend_id: BackendId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: Option<AttemptOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Success,
    Failed { kind: String },
}

/// Lifecycle states of a Job. Transitions are validated by
/// [`JobState::can_transition_to`] so a record can never skip or reverse a
/// step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Admitted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Valid forward edges in the job lifecycle (spec §4.3).
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Admitted)
                | (Queued, Cancelled)
                | (Admitted, Running)
                | (Admitted, Cancelled)
                | (Running, Running) // re-entry on retry with reselection
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

/// The full, consistently-snapshottable record of one submitted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub capability: Capability,
    pub request: CapabilityRequest,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub retention_until: DateTime<Utc>,
    pub attempts: Vec<AttemptRecord>,
    pub result: Option<Value>,
    pub error: Option<JobError>,
    pub allow_cache: bool,
    pub fingerprint: Option<Fingerprint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub kind: String,
    pub message: String,
    pub details: Option<Value>,
}

impl From<&DispatchError> for JobError {
    fn from(e: &DispatchError) -> Self {
        JobError {
            kind: e.kind().to_string(),
            message: e.to_string(),
            details: e.details().cloned(),
        }
    }
}

impl JobRecord {
    pub fn new(
        id: JobId,
        request: CapabilityRequest,
        allow_cache: bool,
        now: DateTime<Utc>,
        retention: chrono::Duration,
    ) -> Self {
        let capability = request.capability();
        JobRecord {
            id,
            capability,
            request,
            status: JobStatus::Queued,
            created_at: now,
            updated_at: now,
            retention_until: now + retention,
            attempts: Vec::new(),
            result: None,
            error: None,
            allow_cache,
            fingerprint: None,
        }
    }

    /// Apply a validated transition, returning an [`DispatchError::Internal`]
    /// if the edge is not legal from the current state.
    pub fn transition(&mut self, next: JobStatus, now: DateTime<Utc>) -> Result<(), DispatchError> {
        if !self.status.can_transition_to(next) {
            return Err(DispatchError::Internal(format!(
                "illegal job transition {:?} -> {:?}",
                self.status, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cannot_skip_admitted() {
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn terminal_states_are_terminal() {
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn fingerprint_displays_as_fixed_width_hex() {
        let f = Fingerprint(1);
        assert_eq!(f.to_string().len(), 32);
    }
}
