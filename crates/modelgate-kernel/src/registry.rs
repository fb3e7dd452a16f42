//! Contracts for resolving a [`Capability`] to a live [`BackendDescriptor`].
//!
//! Kept trait-only in the kernel crate, the same separation the gateway's
//! `CapabilityRegistry`/`GatewayRouter` traits draw between contract and
//! concrete implementation: `modelgate::backend::registry` provides the
//! lock-free implementation, tests provide fakes.

use crate::backend::{BackendDescriptor, BackendId, BackendStatus, HealthState};
use crate::capability::Capability;
use crate::error::DispatchError;

/// Resolves capabilities to backends and tracks per-backend health.
pub trait Router: Send + Sync {
    /// Pick the best eligible backend for `capability`, excluding any id in
    /// `exclude` (already-tried backends on a retry). Increments the winning
    /// backend's in-flight counter atomically with the selection.
    fn resolve(&self, capability: Capability, exclude: &[BackendId]) -> Result<BackendDescriptor, DispatchError>;

    /// Release a permit acquired by a prior `resolve()` call, regardless of
    /// outcome.
    fn release(&self, backend_id: &BackendId);

    /// All backends registered for a capability, healthy or not.
    fn backends_for(&self, capability: Capability) -> Vec<BackendDescriptor>;

    /// Register or replace a backend definition.
    fn register(&self, backend: BackendDescriptor);

    /// Update the health state of a backend (called by the health aggregator).
    fn update_health(&self, backend_id: &BackendId, state: HealthState);

    /// Snapshot every registered backend's current status.
    fn snapshot(&self) -> Vec<BackendStatus>;
}
