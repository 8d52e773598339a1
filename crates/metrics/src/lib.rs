//! Process-wide Prometheus metrics for the container service.
//!
//! Handles are module-level statics registered against the global default
//! registry; [`encode_for_scrape`] renders them in the text exposition
//! format for the `/metrics` endpoint.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec,
    register_int_counter_vec,
    Encoder,
    HistogramVec,
    IntCounterVec,
    TextEncoder,
};

pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "container_http_requests_total",
        "HTTP requests handled by the container service, by method and status",
        &["method", "status"]
    )
    .expect("metric registration is infallible at process start")
});

pub static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "container_http_request_duration_seconds",
        "End-to-end latency of a single HTTP request",
        &["method"]
    )
    .expect("metric registration is infallible at process start")
});

pub static BROKER_OPERATION_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "container_broker_operation_duration_seconds",
        "Latency of a single container broker operation",
        &["operation"]
    )
    .expect("metric registration is infallible at process start")
});

pub static ACCOUNT_UPDATE_OUTCOME_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "container_account_update_outcome_total",
        "Outcome of best-effort account-service notifications",
        &["outcome"]
    )
    .expect("metric registration is infallible at process start")
});

pub static REPLICATION_RPC_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "container_replication_rpc_total",
        "Replication RPCs dispatched, by method and outcome",
        &["method", "outcome"]
    )
    .expect("metric registration is infallible at process start")
});

/// Records one request's outcome. Called once per request from the access
/// log middleware so the two stay in lockstep.
pub fn record_request(method: &str, status: u16, elapsed_seconds: f64) {
    HTTP_REQUESTS_TOTAL.with_label_values(&[method, &status.to_string()]).inc();
    HTTP_REQUEST_DURATION_SECONDS.with_label_values(&[method]).observe(elapsed_seconds);
}

/// Times a broker operation and records its duration regardless of outcome.
pub struct BrokerTimer {
    operation: &'static str,
    start: std::time::Instant,
}

impl BrokerTimer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for BrokerTimer {
    fn drop(&mut self) {
        BROKER_OPERATION_DURATION_SECONDS
            .with_label_values(&[self.operation])
            .observe(self.start.elapsed().as_secs_f64());
    }
}

/// Renders every registered metric in the Prometheus text exposition format.
pub fn encode_for_scrape() -> anyhow::Result<String> {
    let metric_families = prometheus::gather();
    let mut buf = Vec::new();
    TextEncoder::new().encode(&metric_families, &mut buf)?;
    Ok(String::from_utf8(buf)?)
}
