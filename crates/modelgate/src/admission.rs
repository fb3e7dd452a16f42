//! Admission control (spec §4.6): bounds per-backend concurrency with
//! semaphore permits and bounds total queued work with a global counter.
//!
//! Plays the role the teacher's `RateLimitFilter` plays — per-key state
//! behind an async-safe primitive — but gates *concurrency* with permits
//! instead of *rate* with a token bucket.

use dashmap::DashMap;
use modelgate_kernel::backend::BackendId;
use modelgate_kernel::error::DispatchError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

struct BackendGate {
    semaphore: Arc<Semaphore>,
    full_capacity: usize,
}

pub struct AdmissionController {
    gates: DashMap<BackendId, BackendGate>,
    global_pending: AtomicUsize,
    global_queue_cap: usize,
}

/// Held by the dispatcher for the lifetime of one admitted attempt. Dropping
/// it releases the permit.
pub struct AdmissionGuard {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionController {
    pub fn new(global_queue_cap: usize) -> Self {
        AdmissionController {
            gates: DashMap::new(),
            global_pending: AtomicUsize::new(0),
            global_queue_cap,
        }
    }

    pub fn register_backend(&self, backend_id: BackendId, max_in_flight: usize) {
        self.gates.insert(
            backend_id,
            BackendGate {
                semaphore: Arc::new(Semaphore::new(max_in_flight)),
                full_capacity: max_in_flight,
            },
        );
    }

    /// Halve a backend's effective capacity while it is `Degraded`, by
    /// acquiring (and leaking into the gate) half the outstanding permits
    /// rather than attempting to shrink the semaphore, which cannot release
    /// below outstanding permits.
    pub fn degrade_backend(&self, backend_id: &BackendId) {
        if let Some(gate) = self.gates.get(backend_id) {
            let to_remove = gate.full_capacity / 2;
            for _ in 0..to_remove {
                if let Ok(permit) = gate.semaphore.clone().try_acquire_owned() {
                    permit.forget();
                }
            }
        }
    }

    pub fn restore_backend(&self, backend_id: &BackendId) {
        if let Some(gate) = self.gates.get(backend_id) {
            let available = gate.semaphore.available_permits();
            let to_add = gate.full_capacity.saturating_sub(available);
            if to_add > 0 {
                gate.semaphore.add_permits(to_add);
            }
        }
    }

    /// Admit one unit of work against `backend_id`, first checking the
    /// global queue cap. Returns a guard that releases the permit on drop.
    pub async fn admit(&self, backend_id: &BackendId) -> Result<AdmissionGuard, DispatchError> {
        let pending = self.global_pending.fetch_add(1, Ordering::Relaxed);
        if pending >= self.global_queue_cap {
            self.global_pending.fetch_sub(1, Ordering::Relaxed);
            return Err(DispatchError::Overloaded);
        }

        let Some(gate) = self.gates.get(backend_id).map(|g| g.semaphore.clone()) else {
            self.global_pending.fetch_sub(1, Ordering::Relaxed);
            return Err(DispatchError::NoBackendAvailable);
        };

        let permit = gate.acquire_owned().await.map_err(|_| DispatchError::Internal("semaphore closed".into()))?;
        self.global_pending.fetch_sub(1, Ordering::Relaxed);
        Ok(AdmissionGuard { _permit: permit })
    }

    pub fn pending(&self) -> usize {
        self.global_pending.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_capacity() {
        let ac = AdmissionController::new(10);
        ac.register_backend("b1".into(), 2);
        let g1 = ac.admit(&"b1".to_string()).await.unwrap();
        let g2 = ac.admit(&"b1".to_string()).await.unwrap();
        drop(g1);
        drop(g2);
    }

    #[tokio::test]
    async fn rejects_when_global_queue_is_full() {
        let ac = AdmissionController::new(0);
        ac.register_backend("b1".into(), 4);
        assert!(matches!(
            ac.admit(&"b1".to_string()).await,
            Err(DispatchError::Overloaded)
        ));
    }

    #[tokio::test]
    async fn unknown_backend_is_rejected() {
        let ac = AdmissionController::new(10);
        assert!(matches!(
            ac.admit(&"ghost".to_string()).await,
            Err(DispatchError::NoBackendAvailable)
        ));
    }
}
