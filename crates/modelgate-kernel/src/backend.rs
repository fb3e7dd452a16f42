//! Backend descriptors and health/circuit-breaker state (spec §4.1, §4.8).

use crate::capability::Capability;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A stable identifier for a configured backend instance, e.g. `"llm-primary"`.
pub type BackendId = String;

/// Static configuration for one southbound AI backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub id: BackendId,
    pub capability: Capability,
    pub base_url: String,
    pub weight: u32,
    pub max_in_flight: usize,
    pub request_timeout: Duration,
}

/// Circuit-breaker lifecycle for a backend (spec §4.8).
///
/// Modeled as an explicit state rather than an `AtomicU8` because a
/// transition must change the status and the cooldown timestamp together —
/// splitting them across two atomics would let a reader observe `Open` with
/// a stale or missing deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HealthState {
    /// Accepting traffic normally.
    Closed,
    /// Rejecting new admission; probes are still issued by the health
    /// aggregator. `retry_after_unix_ms` is when a probe may next succeed.
    Open { retry_after_unix_ms: i64 },
    /// Probationary: a bounded number of live requests are let through to
    /// test recovery before fully closing the breaker.
    HalfOpen { trial_budget: u32 },
    /// Accepting traffic at half its configured capacity (spec §4.6, P4):
    /// failures are mounting but haven't yet crossed `circuit_failure_threshold`.
    Degraded,
}

impl Default for HealthState {
    fn default() -> Self {
        HealthState::Closed
    }
}

impl HealthState {
    pub fn is_accepting(&self) -> bool {
        !matches!(self, HealthState::Open { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Closed => "closed",
            HealthState::Open { .. } => "open",
            HealthState::HalfOpen { .. } => "half_open",
            HealthState::Degraded => "degraded",
        }
    }
}

/// A point-in-time snapshot returned by `GET /health` and `GET /admin/backends`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendStatus {
    pub id: BackendId,
    pub capability: Capability,
    pub health: HealthState,
    pub in_flight: usize,
    pub max_in_flight: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_state_does_not_accept() {
        let s = HealthState::Open { retry_after_unix_ms: 0 };
        assert!(!s.is_accepting());
    }

    #[test]
    fn closed_and_half_open_accept() {
        assert!(HealthState::Closed.is_accepting());
        assert!(HealthState::HalfOpen { trial_budget: 1 }.is_accepting());
    }
}
