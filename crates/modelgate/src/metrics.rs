//! Prometheus metrics (spec §6). The teacher's `mofa-gateway` already
//! depends on `prometheus`; this registers the named gauges/counters/
//! histograms the northbound table requires and renders them at `/metrics`.

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramVec, IntGauge, Opts, Registry, TextEncoder,
};

pub struct Metrics {
    pub registry: Registry,
    pub requests_total: CounterVec,
    pub request_duration_seconds: HistogramVec,
    pub active_connections: GaugeVec,
    pub jobs_queued: IntGauge,
    pub jobs_running: IntGauge,
    pub model_inference_total: CounterVec,
    pub errors_total: CounterVec,
    pub backend_health: GaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("requests_total", "Total dispatched requests"),
            &["capability", "status"],
        )
        .unwrap();
        let request_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new("request_duration_seconds", "Dispatch latency"),
            &["capability"],
        )
        .unwrap();
        let active_connections = GaugeVec::new(
            Opts::new("active_connections", "In-flight connections per backend"),
            &["backend"],
        )
        .unwrap();
        let jobs_queued = IntGauge::new("jobs_queued", "Jobs awaiting admission").unwrap();
        let jobs_running = IntGauge::new("jobs_running", "Jobs currently running").unwrap();
        let model_inference_total = CounterVec::new(
            Opts::new("model_inference_total", "Total backend inference calls"),
            &["capability", "status"],
        )
        .unwrap();
        let errors_total = CounterVec::new(
            Opts::new("errors_total", "Total dispatch errors"),
            &["capability", "kind"],
        )
        .unwrap();
        let backend_health = GaugeVec::new(
            Opts::new("backend_health", "1 = closed, 0.5 = half-open, 0 = open"),
            &["backend"],
        )
        .unwrap();

        registry.register(Box::new(requests_total.clone())).unwrap();
        registry.register(Box::new(request_duration_seconds.clone())).unwrap();
        registry.register(Box::new(active_connections.clone())).unwrap();
        registry.register(Box::new(jobs_queued.clone())).unwrap();
        registry.register(Box::new(jobs_running.clone())).unwrap();
        registry.register(Box::new(model_inference_total.clone())).unwrap();
        registry.register(Box::new(errors_total.clone())).unwrap();
        registry.register(Box::new(backend_health.clone())).unwrap();

        Metrics {
            registry,
            requests_total,
            request_duration_seconds,
            active_connections,
            jobs_queued,
            jobs_running,
            model_inference_total,
            errors_total,
            backend_health,
        }
    }

    pub fn render(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
