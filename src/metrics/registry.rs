use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for latency metrics (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`,
/// `gauge!`, `histogram!`) can be used anywhere in the codebase. The
/// `PrometheusHandle` is retained solely for rendering `/metrics`.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric
    /// descriptions. Must be called **once** at startup before any
    /// `counter!` / `gauge!` / `histogram!` calls.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        // --- Describe all metrics (adds HELP / TYPE lines) ---

        // request path
        describe_counter!(
            "gateway_requests_total",
            Unit::Count,
            "Total client requests processed"
        );
        describe_histogram!(
            "gateway_request_duration_seconds",
            Unit::Seconds,
            "Request duration from client perspective"
        );

        // dispatch
        describe_counter!(
            "gateway_dispatch_attempts_total",
            Unit::Count,
            "Upstream connect attempts made by the dispatcher"
        );
        describe_counter!(
            "gateway_dispatch_direct_total",
            Unit::Count,
            "Dispatches that fell back to a direct connection"
        );

        // pool & probing
        describe_gauge!(
            "gateway_pool_entries",
            Unit::Count,
            "Number of upstream proxies in the pool"
        );
        describe_gauge!(
            "gateway_upstream_alive",
            Unit::Count,
            "Upstream global reachability: 1=alive 0=dead"
        );
        describe_counter!(
            "gateway_probe_total",
            Unit::Count,
            "Total reachability probe rounds per upstream"
        );
        describe_histogram!(
            "gateway_probe_duration_seconds",
            Unit::Seconds,
            "Duration of one upstream probe"
        );
        describe_counter!(
            "gateway_host_recovery_total",
            Unit::Count,
            "Per-host recovery probe outcomes"
        );

        // connections
        describe_gauge!(
            "gateway_connections_active",
            Unit::Count,
            "Number of active downstream connections"
        );
        describe_counter!(
            "gateway_connections_total",
            Unit::Count,
            "Total connections accepted"
        );

        // admin
        describe_counter!(
            "gateway_admin_ops_total",
            Unit::Count,
            "Admin operations on the pool"
        );

        Self { handle }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
