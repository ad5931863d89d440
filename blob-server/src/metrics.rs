use std::sync::Arc;

use blob_storage::MetricsCollector;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Response, StatusCode};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    static ref BLOB_OPERATIONS: IntCounterVec = register_int_counter_vec!(
        "blob_operations_total",
        "Blob store operations by kind",
        &["operation"]
    )
    .expect("metric can be registered");
    static ref BYTES_RECEIVED: IntCounter =
        register_int_counter!("blob_bytes_received_total", "Bytes staged from uploads")
            .expect("metric can be registered");
    static ref BYTES_SENT: IntCounter =
        register_int_counter!("blob_bytes_sent_total", "Bytes streamed to clients")
            .expect("metric can be registered");
    static ref HTTP_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "blob_http_requests_total",
        "HTTP requests by method and status",
        &["method", "status"]
    )
    .expect("metric can be registered");
    static ref HTTP_DURATION: HistogramVec = register_histogram_vec!(
        "blob_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method"]
    )
    .expect("metric can be registered");
}

/// Prometheus backed metrics, registered in the default registry.
#[derive(Debug, Clone, Default)]
pub struct PrometheusMetrics;

impl PrometheusMetrics {
    pub fn new() -> Self {
        Self
    }

    pub fn to_shared(&self) -> blob_storage::SharedMetrics {
        blob_storage::SharedMetrics::new(Arc::new(self.clone()))
    }

    pub fn http_request(&self, method: &str, status: u16, seconds: f64) {
        HTTP_REQUESTS
            .with_label_values(&[method, &status.to_string()])
            .inc();
        HTTP_DURATION.with_label_values(&[method]).observe(seconds);
    }

    fn operation(&self, name: &str) {
        BLOB_OPERATIONS.with_label_values(&[name]).inc();
    }
}

impl MetricsCollector for PrometheusMetrics {
    fn blob_committed(&self) {
        self.operation("committed");
    }

    fn blob_already_present(&self) {
        self.operation("already_present");
    }

    fn blob_deleted(&self) {
        self.operation("deleted");
    }

    fn blob_corrupted(&self) {
        self.operation("corrupted");
    }

    fn integrity_rejected(&self) {
        self.operation("integrity_rejected");
    }

    fn hook_failed(&self) {
        self.operation("hook_failed");
    }

    fn bytes_received(&self, amount: u64) {
        BYTES_RECEIVED.inc_by(amount);
    }

    fn bytes_sent(&self, amount: u64) {
        BYTES_SENT.inc_by(amount);
    }
}

/// Renders the default registry in the Prometheus text format.
pub fn render() -> Response<Full<Bytes>> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("failed to encode metrics: {e}");
        return Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Full::new(Bytes::from("failed to encode metrics")))
            .unwrap();
    }

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(Full::new(Bytes::from(buffer)))
        .unwrap()
}
