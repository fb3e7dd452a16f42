//! Environment-driven assembly of [`GatewayConfig`].
//!
//! Mirrors `mofa-gateway::main`'s pattern of reading named environment
//! variables with typed defaults before the runtime is constructed.

use modelgate_kernel::backend::BackendDescriptor;
use modelgate_kernel::capability::Capability;
use modelgate_kernel::config::GatewayConfig;
use std::time::Duration;

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_millis(key: &str, default_ms: u64) -> Duration {
    let ms = std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default_ms);
    Duration::from_millis(ms)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(default)
}

fn env_seconds(key: &str, default_secs: u64) -> Duration {
    let secs = std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default_secs);
    Duration::from_secs(secs)
}

/// Build the one backend this process knows about for `capability`, from
/// `{PREFIX}_SERVICE_URL`. Absent variables simply leave the capability
/// unregistered — `GatewayConfig::validate()` then reports it as uncovered.
fn backend_from_env(capability: Capability, env_key: &str, timeout_ms: u64, max_in_flight: usize) -> Option<BackendDescriptor> {
    let base_url = std::env::var(env_key).ok()?;
    Some(BackendDescriptor {
        id: capability.as_str().to_string(),
        capability,
        base_url,
        weight: 1,
        max_in_flight,
        request_timeout: Duration::from_millis(timeout_ms),
    })
}

/// Assemble a [`GatewayConfig`] from the process environment. Callers must
/// still call `.validate()` before using the result.
pub fn load_from_env() -> GatewayConfig {
    let request_timeout_ms = env_u32("BACKEND_REQUEST_TIMEOUT_MS", 30_000) as u64;
    let max_in_flight = env_usize("BACKEND_MAX_IN_FLIGHT", 16);

    let backends: Vec<BackendDescriptor> = [
        ("LLM_SERVICE_URL", Capability::LlmCompletion),
        ("LLM_SERVICE_URL", Capability::LlmChat),
        ("VISION_SERVICE_URL", Capability::VisionAnalyze),
        ("NLP_SERVICE_URL", Capability::NlpAnalyze),
        ("DATA_PROCESSOR_URL", Capability::DataProcess),
    ]
    .into_iter()
    .filter_map(|(key, cap)| backend_from_env(cap, key, request_timeout_ms, max_in_flight))
    .collect();

    let global_queue_cap = env_usize(
        "GLOBAL_QUEUE_CAP",
        backends.iter().map(|b| b.max_in_flight).sum::<usize>().max(1) * 4,
    );

    GatewayConfig {
        listen_port: env_u16("GATEWAY_PORT", 8080),
        backends,
        global_queue_cap,
        retry_max_attempts: env_u32("RETRY_MAX_ATTEMPTS", 3),
        cache_enabled: env_bool("CACHE_ENABLED", true),
        cache_max_entries: env_usize("CACHE_MAX_ENTRIES", 10_000),
        cache_float_precision: env_u32("CACHE_FLOAT_PRECISION", 3),
        cache_ttl: env_seconds("CACHE_TTL_SECONDS", 7200),
        batch_max_size: env_usize("BATCH_MAX_SIZE", 8),
        batch_max_delay: env_millis("BATCH_MAX_DELAY_MS", 50),
        health_probe_interval: env_millis("HEALTH_PROBE_INTERVAL_MS", 10_000),
        circuit_breaker_failure_threshold: env_u32("CIRCUIT_BREAKER_FAILURE_THRESHOLD", 5),
        circuit_breaker_cooldown: env_millis("CIRCUIT_BREAKER_COOLDOWN_MS", 30_000),
    }
}
