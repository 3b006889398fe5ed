//! Upstream latency metrics.
//!
//! # Responsibilities
//! - Define the per-request latency label set
//! - Record one observation per forwarded request
//! - Expose a Prometheus-compatible metrics endpoint
//!
//! # Design Decisions
//! - The recorder sits behind a trait so the sink stays an external
//!   collaborator; tests inject a capturing implementation
//! - Recording is infallible and happens after the response value exists,
//!   so a sink problem can never affect the response
//! - Labels mirror the upstream timing series: outpost, upstream, scheme,
//!   method, path, request host, resolved user

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Label set attached to each upstream latency observation.
///
/// `user` is the resolved identity, or empty when the request carried no
/// claims (allowlist bypass).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamLabels {
    pub outpost_name: String,
    pub upstream_host: String,
    pub scheme: String,
    pub method: String,
    pub path: String,
    pub host: String,
    pub user: String,
}

/// Sink for per-request upstream latency observations.
pub trait LatencyRecorder: Send + Sync {
    fn record(&self, elapsed: Duration, labels: UpstreamLabels);
}

/// Production recorder backed by the `metrics` facade.
#[derive(Debug, Default)]
pub struct PrometheusLatencyRecorder;

impl LatencyRecorder for PrometheusLatencyRecorder {
    fn record(&self, elapsed: Duration, labels: UpstreamLabels) {
        metrics::histogram!(
            "gateway_upstream_duration_seconds",
            "outpost_name" => labels.outpost_name,
            "upstream_host" => labels.upstream_host,
            "scheme" => labels.scheme,
            "method" => labels.method,
            "path" => labels.path,
            "host" => labels.host,
            "user" => labels.user,
        )
        .record(elapsed.as_secs_f64());
    }
}

/// Install the Prometheus exporter and serve scrapes on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}
