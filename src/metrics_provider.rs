use std::sync::atomic::AtomicU64;
use std::sync::LazyLock;

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_with_registry,
};
use prometheus::{
    Encoder, Histogram, IntCounterVec, IntGauge, Registry as PrometheusRegistry, TextEncoder,
};
use tracing::error;

use crate::error::Error;

pub static IN_FLIGHT_REQUESTS: AtomicU64 = AtomicU64::new(0);

pub static METRICS_PROVIDER: LazyLock<MetricsProvider> =
    LazyLock::new(|| MetricsProvider::new().expect("Unable to create metrics provider"));

fn registration_error(name: &str) -> impl FnOnce(prometheus::Error) -> Error + '_ {
    move |err| {
        error!("Unable to create {name} metric: {err}");
        Error::Internal(format!("Unable to create {name} metric"))
    }
}

pub struct MetricsProvider {
    registry: PrometheusRegistry,
    /// Requests by response status.
    pub metric_http_request_total: IntCounterVec,
    pub metric_http_request_duration: Histogram,
    pub metric_http_request_in_flight: IntGauge,
    /// Pulls refused by policy, by violation.
    pub metric_policy_denials: IntCounterVec,
}

impl MetricsProvider {
    pub fn new() -> Result<Self, Error> {
        let registry = PrometheusRegistry::new();

        let metric_http_request_total = register_int_counter_vec_with_registry!(
            "http_requests_total",
            "Total number of HTTP requests served.",
            &["status"],
            &registry
        )
        .map_err(registration_error("http_requests_total"))?;

        let metric_http_request_duration = register_histogram_with_registry!(
            "http_request_duration_ms",
            "The HTTP request latencies in milliseconds.",
            vec![1.0, 5.0, 25.0, 100.0, 500.0, 2500.0, 10000.0],
            &registry
        )
        .map_err(registration_error("http_request_duration_ms"))?;

        let metric_http_request_in_flight = register_int_gauge_with_registry!(
            "http_connections_in_flight",
            "The current number of open client connections.",
            &registry
        )
        .map_err(registration_error("http_connections_in_flight"))?;

        let metric_policy_denials = register_int_counter_vec_with_registry!(
            "policy_denials_total",
            "Pulls refused by the content trust or vulnerability policy.",
            &["reason"],
            &registry
        )
        .map_err(registration_error("policy_denials_total"))?;

        Ok(Self {
            registry,
            metric_http_request_total,
            metric_http_request_duration,
            metric_http_request_in_flight,
            metric_policy_denials,
        })
    }

    /// Text exposition of every metric, with its content type.
    pub fn gather(&self) -> Result<(String, Vec<u8>), Error> {
        let mut buffer = vec![];
        let encoder = TextEncoder::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|err| Error::Internal(format!("Unable to encode metrics: {err}")))?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}
