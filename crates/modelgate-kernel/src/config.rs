//! Gateway configuration container and structural validation.
//!
//! [`GatewayConfig`] aggregates every tunable named in the specification and
//! exposes a single [`validate()`](GatewayConfig::validate) that checks all
//! structural invariants before any runtime resource (socket, semaphore,
//! background task) is allocated — the same compile-before-run discipline
//! the kernel's original `GatewayConfig::validate()` establishes.

use crate::backend::BackendDescriptor;
use crate::capability::Capability;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// Structural configuration error, detected before the runtime starts.
/// Distinct from [`crate::error::DispatchError`], which covers request-time
/// failures once the gateway is already serving traffic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no backends configured")]
    NoBackends,
    #[error("capability {0} has no backend registered")]
    UncoveredCapability(&'static str),
    #[error("backend id {0:?} is registered more than once")]
    DuplicateBackend(String),
    #[error("backend {0:?} has a zero request timeout")]
    ZeroTimeout(String),
    #[error("backend {0:?} has a zero max_in_flight")]
    ZeroConcurrency(String),
    #[error("global_queue_cap must be >= the sum of max_in_flight")]
    QueueCapTooSmall,
    #[error("retry_max_attempts must be >= 1")]
    InvalidRetryAttempts,
    #[error("cache_max_entries must be >= 1 when response caching is enabled")]
    InvalidCacheSize,
}

/// Top-level runtime configuration, assembled from environment variables in
/// `main.rs`.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_port: u16,
    pub backends: Vec<BackendDescriptor>,
    pub global_queue_cap: usize,
    pub retry_max_attempts: u32,
    pub cache_enabled: bool,
    pub cache_max_entries: usize,
    pub cache_float_precision: u32,
    /// Per-entry time-to-live (spec §4.5). `Duration::ZERO` disables expiry.
    pub cache_ttl: Duration,
    pub batch_max_size: usize,
    pub batch_max_delay: Duration,
    pub health_probe_interval: Duration,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl GatewayConfig {
    /// Validate all structural invariants of this configuration, in the same
    /// ordered-checks style as the kernel's route/backend validator: the
    /// *first* violation found is returned.
    ///
    /// Checks performed (in order):
    /// 1. At least one backend is declared.
    /// 2. No two backends share an id.
    /// 3. Every backend has a non-zero timeout and non-zero concurrency.
    /// 4. Every [`Capability`] resolves to at least one backend.
    /// 5. `global_queue_cap` is at least the sum of per-backend concurrency.
    /// 6. `retry_max_attempts` is at least 1.
    /// 7. If caching is enabled, `cache_max_entries` is at least 1.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut covered: HashSet<Capability> = HashSet::new();
        let mut concurrency_sum: usize = 0;

        for backend in &self.backends {
            if !seen_ids.insert(backend.id.as_str()) {
                return Err(ConfigError::DuplicateBackend(backend.id.clone()));
            }
            if backend.request_timeout.is_zero() {
                return Err(ConfigError::ZeroTimeout(backend.id.clone()));
            }
            if backend.max_in_flight == 0 {
                return Err(ConfigError::ZeroConcurrency(backend.id.clone()));
            }
            covered.insert(backend.capability);
            concurrency_sum += backend.max_in_flight;
        }

        for capability in Capability::all() {
            if !covered.contains(&capability) {
                return Err(ConfigError::UncoveredCapability(capability.as_str()));
            }
        }

        if self.global_queue_cap < concurrency_sum {
            return Err(ConfigError::QueueCapTooSmall);
        }

        if self.retry_max_attempts < 1 {
            return Err(ConfigError::InvalidRetryAttempts);
        }

        if self.cache_enabled && self.cache_max_entries == 0 {
            return Err(ConfigError::InvalidCacheSize);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(id: &str, cap: Capability) -> BackendDescriptor {
        BackendDescriptor {
            id: id.to_string(),
            capability: cap,
            base_url: "http://127.0.0.1:9".into(),
            weight: 1,
            max_in_flight: 4,
            request_timeout: Duration::from_secs(5),
        }
    }

    fn full_config() -> GatewayConfig {
        GatewayConfig {
            listen_port: 8080,
            backends: Capability::all()
                .into_iter()
                .map(|c| backend(c.as_str(), c))
                .collect(),
            global_queue_cap: 64,
            retry_max_attempts: 3,
            cache_enabled: true,
            cache_max_entries: 1000,
            cache_float_precision: 3,
            cache_ttl: Duration::from_secs(7200),
            batch_max_size: 8,
            batch_max_delay: Duration::from_millis(50),
            health_probe_interval: Duration::from_secs(10),
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_cooldown: Duration::from_secs(30),
        }
    }

    #[test]
    fn rejects_no_backends() {
        let mut cfg = full_config();
        cfg.backends.clear();
        assert_eq!(cfg.validate(), Err(ConfigError::NoBackends));
    }

    #[test]
    fn rejects_uncovered_capability() {
        let mut cfg = full_config();
        cfg.backends.retain(|b| b.capability != Capability::DataProcess);
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::UncoveredCapability("data_process"))
        );
    }

    #[test]
    fn rejects_queue_cap_below_concurrency_sum() {
        let mut cfg = full_config();
        cfg.global_queue_cap = 1;
        assert_eq!(cfg.validate(), Err(ConfigError::QueueCapTooSmall));
    }

    #[test]
    fn accepts_well_formed_config() {
        assert!(full_config().validate().is_ok());
    }
}
