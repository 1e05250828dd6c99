use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Once;
use std::time::Duration;

/// Metric name prefix for all server metrics
const PREFIX: &str = "mcp_bigquery";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // MCP Metrics
    pub static ref MCP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_mcp_requests_total"), "MCP requests by method and outcome"),
        &["method", "outcome"]
    ).expect("Failed to create mcp_requests_total metric");

    pub static ref RATE_LIMIT_HITS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_rate_limit_hits_total"), "Rate limit violations"),
        &["category"]
    ).expect("Failed to create rate_limit_hits_total metric");

    pub static ref WEBSOCKET_CONNECTIONS: Gauge = Gauge::new(
        format!("{PREFIX}_websocket_connections"),
        "Number of open MCP WebSocket connections"
    ).expect("Failed to create websocket_connections metric");

    // BigQuery Metrics
    pub static ref BIGQUERY_QUERIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_bigquery_queries_total"), "Query tool executions by status"),
        &["status"]
    ).expect("Failed to create bigquery_queries_total metric");

    pub static ref BIGQUERY_BYTES_PROCESSED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_bigquery_bytes_processed_total"),
        "Bytes processed by successful queries"
    ).expect("Failed to create bigquery_bytes_processed_total metric");
}

static INIT: Once = Once::new();

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    INIT.call_once(|| {
        let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
        let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
        let _ = REGISTRY.register(Box::new(MCP_REQUESTS_TOTAL.clone()));
        let _ = REGISTRY.register(Box::new(RATE_LIMIT_HITS_TOTAL.clone()));
        let _ = REGISTRY.register(Box::new(WEBSOCKET_CONNECTIONS.clone()));
        let _ = REGISTRY.register(Box::new(BIGQUERY_QUERIES_TOTAL.clone()));
        let _ = REGISTRY.register(Box::new(BIGQUERY_BYTES_PROCESSED_TOTAL.clone()));

        tracing::debug!("Metrics system initialized");
    });
}

/// Map a request path onto one of the served routes, so that arbitrary
/// client paths do not create new label values.
pub fn categorize_endpoint(path: &str) -> &'static str {
    match path.trim_end_matches('/') {
        "" => "root",
        "/health" => "/health",
        "/openapi.yaml" => "/openapi.yaml",
        "/metrics" => "/metrics",
        "/mcp" => "/mcp",
        "/mcp/batch" => "/mcp/batch",
        "/mcp/stream" => "/mcp/stream",
        "/mcp/ws" => "/mcp/ws",
        _ => "other",
    }
}

/// Bounded label for the HTTP method.
pub fn categorize_method(method: &str) -> &'static str {
    match method {
        "GET" => "GET",
        "POST" => "POST",
        "PUT" => "PUT",
        "DELETE" => "DELETE",
        "PATCH" => "PATCH",
        "HEAD" => "HEAD",
        "OPTIONS" => "OPTIONS",
        _ => "OTHER",
    }
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Record a handled MCP request
pub fn record_mcp_request(method: &str, outcome: &str) {
    MCP_REQUESTS_TOTAL
        .with_label_values(&[method, outcome])
        .inc();
}

/// Record a rate limit hit
pub fn record_rate_limit_hit(category: &str) {
    RATE_LIMIT_HITS_TOTAL.with_label_values(&[category]).inc();
}

/// Record a query tool execution
pub fn record_bigquery_query(status: &str, bytes_processed: Option<u64>) {
    BIGQUERY_QUERIES_TOTAL.with_label_values(&[status]).inc();
    if let Some(bytes) = bytes_processed {
        BIGQUERY_BYTES_PROCESSED_TOTAL.inc_by(bytes as f64);
    }
}

pub fn websocket_opened() {
    WEBSOCKET_CONNECTIONS.inc();
}

pub fn websocket_closed() {
    WEBSOCKET_CONNECTIONS.dec();
}

/// Metrics endpoint handler
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
