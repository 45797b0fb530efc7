//! Prometheus metrics for the gateway.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, and provides [`MetricsRecorder`], the
//! handle every component receives at construction.  Also hosts the
//! request-capture middleware and the `/metrics` endpoint handler.

use axum::body::HttpBody;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "filegate_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path, status.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "filegate_http_request_duration_seconds";

/// HTTP request body size (histogram). Labels: method, path.
pub const HTTP_REQUEST_SIZE_BYTES: &str = "filegate_http_request_size_bytes";

/// HTTP response body size (histogram). Labels: method, path, status.
pub const HTTP_RESPONSE_SIZE_BYTES: &str = "filegate_http_response_size_bytes";

/// Requests currently inside the pipeline (gauge).
pub const HTTP_REQUESTS_IN_FLIGHT: &str = "filegate_http_requests_in_flight";

/// Files stored (counter). Labels: tenant.
pub const STORE_UPLOADS_TOTAL: &str = "filegate_store_uploads_total";

/// Time spent handing one file to the object store (histogram). Labels: tenant.
pub const STORE_UPLOAD_DURATION_SECONDS: &str = "filegate_store_upload_duration_seconds";

/// Size of stored files (histogram). Labels: tenant.
pub const STORE_UPLOAD_SIZE_BYTES: &str = "filegate_store_upload_size_bytes";

/// Files opened for download (counter). Labels: tenant.
pub const STORE_DOWNLOADS_TOTAL: &str = "filegate_store_downloads_total";

/// Files deleted (counter). Labels: tenant.
pub const STORE_DELETES_TOTAL: &str = "filegate_store_deletes_total";

/// Entries returned by listings (counter). Labels: tenant.
pub const STORE_LISTED_FILES_TOTAL: &str = "filegate_store_listed_files_total";

/// Object store failures (counter). Labels: operation, tenant, error.
pub const STORE_ERRORS_TOTAL: &str = "filegate_store_errors_total";

/// Credential store queries (counter). Labels: store, operation, status.
pub const CREDENTIAL_QUERIES_TOTAL: &str = "filegate_credential_queries_total";

/// Credential store query duration (histogram). Labels: store, operation.
pub const CREDENTIAL_QUERY_DURATION_SECONDS: &str = "filegate_credential_query_duration_seconds";

const SIZE_BUCKETS: &[f64] = &[
    100.0,
    1_024.0,
    10_240.0,
    102_400.0,
    1_048_576.0,
    10_485_760.0,
    104_857_600.0,
];

const UPLOAD_TIME_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0];

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder (or the install error).
static PROMETHEUS_HANDLE: OnceLock<Result<PrometheusHandle, String>> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a clone of the global handle.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    PROMETHEUS_HANDLE
        .get_or_init(|| install_recorder().map_err(|e| e.to_string()))
        .clone()
        .map_err(anyhow::Error::msg)
}

fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_REQUEST_SIZE_BYTES.to_string()),
            SIZE_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(HTTP_RESPONSE_SIZE_BYTES.to_string()),
            SIZE_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(STORE_UPLOAD_SIZE_BYTES.to_string()),
            SIZE_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(STORE_UPLOAD_DURATION_SECONDS.to_string()),
            UPLOAD_TIME_BUCKETS,
        )?
        .install_recorder()?;
    describe_metrics();
    Ok(handle)
}

/// Register metric descriptions with the global recorder.
fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_histogram!(HTTP_REQUEST_SIZE_BYTES, "HTTP request size in bytes");
    describe_histogram!(HTTP_RESPONSE_SIZE_BYTES, "HTTP response size in bytes");
    describe_gauge!(
        HTTP_REQUESTS_IN_FLIGHT,
        "Current number of HTTP requests being served"
    );
    describe_counter!(STORE_UPLOADS_TOTAL, "Files stored per tenant");
    describe_histogram!(
        STORE_UPLOAD_DURATION_SECONDS,
        "Time to hand one file to the object store"
    );
    describe_histogram!(STORE_UPLOAD_SIZE_BYTES, "Size of stored files");
    describe_counter!(STORE_DOWNLOADS_TOTAL, "Files opened for download");
    describe_counter!(STORE_DELETES_TOTAL, "Files deleted");
    describe_counter!(STORE_LISTED_FILES_TOTAL, "Entries returned by listings");
    describe_counter!(STORE_ERRORS_TOTAL, "Object store failures");
    describe_counter!(CREDENTIAL_QUERIES_TOTAL, "Credential store queries");
    describe_histogram!(
        CREDENTIAL_QUERY_DURATION_SECONDS,
        "Credential store query duration in seconds"
    );
}

// -- Recorder handle ----------------------------------------------------------

/// Cloneable metrics handle passed to every component.
///
/// Observations go through the `metrics` facade; when no recorder is
/// installed they are dropped.  `render` needs an installed exporter.
#[derive(Clone, Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Install (or reuse) the Prometheus exporter and wrap its handle.
    pub fn install() -> anyhow::Result<Self> {
        Ok(Self {
            handle: Some(init_metrics()?),
        })
    }

    /// A recorder that emits through the facade but cannot render.
    pub fn detached() -> Self {
        Self { handle: None }
    }

    /// Render Prometheus exposition text.
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(|h| h.render())
    }

    /// Record one completed HTTP request.
    pub fn record_http(
        &self,
        method: &str,
        path: &str,
        status: u16,
        elapsed: Duration,
        request_size: Option<u64>,
        response_size: u64,
    ) {
        let method = method.to_string();
        let path = path.to_string();
        let status = status.to_string();
        counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status.clone()).increment(1);
        histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method.clone(), "path" => path.clone(), "status" => status.clone()).record(elapsed.as_secs_f64());
        if let Some(size) = request_size.filter(|s| *s > 0) {
            histogram!(HTTP_REQUEST_SIZE_BYTES, "method" => method.clone(), "path" => path.clone()).record(size as f64);
        }
        histogram!(HTTP_RESPONSE_SIZE_BYTES, "method" => method, "path" => path, "status" => status).record(response_size as f64);
    }

    fn in_flight(&self, delta: f64) {
        gauge!(HTTP_REQUESTS_IN_FLIGHT).increment(delta);
    }

    /// Record a file handed to the object store.
    pub fn record_upload(&self, tenant: &str, size: u64, elapsed: Duration) {
        let tenant = tenant.to_string();
        counter!(STORE_UPLOADS_TOTAL, "tenant" => tenant.clone()).increment(1);
        histogram!(STORE_UPLOAD_DURATION_SECONDS, "tenant" => tenant.clone())
            .record(elapsed.as_secs_f64());
        histogram!(STORE_UPLOAD_SIZE_BYTES, "tenant" => tenant).record(size as f64);
    }

    pub fn record_download(&self, tenant: &str) {
        counter!(STORE_DOWNLOADS_TOTAL, "tenant" => tenant.to_string()).increment(1);
    }

    pub fn record_delete(&self, tenant: &str) {
        counter!(STORE_DELETES_TOTAL, "tenant" => tenant.to_string()).increment(1);
    }

    pub fn record_listing(&self, tenant: &str, entries: usize) {
        counter!(STORE_LISTED_FILES_TOTAL, "tenant" => tenant.to_string())
            .increment(entries as u64);
    }

    /// Count an object store failure. `kind` must come from a fixed set
    /// such as [`StorageError::kind`](crate::storage::backend::StorageError::kind).
    pub fn record_store_error(&self, operation: &'static str, tenant: &str, kind: &'static str) {
        counter!(
            STORE_ERRORS_TOTAL,
            "operation" => operation,
            "tenant" => tenant.to_string(),
            "error" => kind
        )
        .increment(1);
    }

    /// Record one credential store query.
    pub fn record_credential_query(
        &self,
        store: &'static str,
        operation: &'static str,
        ok: bool,
        elapsed: Duration,
    ) {
        let status = if ok { "success" } else { "error" };
        counter!(CREDENTIAL_QUERIES_TOTAL, "store" => store, "operation" => operation, "status" => status).increment(1);
        histogram!(CREDENTIAL_QUERY_DURATION_SECONDS, "store" => store, "operation" => operation)
            .record(elapsed.as_secs_f64());
    }
}

// -- Request capture ----------------------------------------------------------

/// One in-progress request observation.
///
/// Emits exactly once: either through [`finish`](Self::finish) or, if the
/// request unwinds before a response exists, from `Drop` as a 500.
struct RequestObservation {
    recorder: MetricsRecorder,
    method: String,
    path: String,
    request_size: Option<u64>,
    start: Instant,
    done: bool,
}

impl RequestObservation {
    fn start(recorder: MetricsRecorder, method: String, path: String, request_size: Option<u64>) -> Self {
        recorder.in_flight(1.0);
        Self {
            recorder,
            method,
            path,
            request_size,
            start: Instant::now(),
            done: false,
        }
    }

    fn finish(mut self, status: u16, response_size: u64) {
        self.emit(status, response_size);
    }

    fn emit(&mut self, status: u16, response_size: u64) {
        if self.done {
            return;
        }
        self.done = true;
        self.recorder.in_flight(-1.0);
        self.recorder.record_http(
            &self.method,
            &self.path,
            status,
            self.start.elapsed(),
            self.request_size,
            response_size,
        );
    }
}

impl Drop for RequestObservation {
    fn drop(&mut self) {
        self.emit(StatusCode::INTERNAL_SERVER_ERROR.as_u16(), 0);
    }
}

/// Axum middleware that records count, duration, request size, and
/// response size for every request that reaches it.
pub async fn metrics_middleware(
    State(recorder): State<MetricsRecorder>,
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    // Do not instrument the metrics endpoint itself.
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let request_size = content_length(req.headers());
    let observation = RequestObservation::start(
        recorder,
        req.method().to_string(),
        normalize_path(req.uri().path()),
        request_size,
    );

    let response = next.run(req).await;
    let response_size = content_length(response.headers())
        .or_else(|| response.body().size_hint().exact())
        .unwrap_or(0);
    observation.finish(response.status().as_u16(), response_size);

    response
}

fn content_length(headers: &axum::http::HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

// -- Path normalization -------------------------------------------------------

/// Collapse request paths to known routes so labels stay low-cardinality.
fn normalize_path(path: &str) -> String {
    match path {
        "/" | "/health" | "/metrics" | "/openapi.json" | "/files" | "/files/list" => {
            path.to_string()
        }
        p if p.starts_with("/static/") => "/static".to_string(),
        _ => "/other".to_string(),
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler(State(recorder): State<MetricsRecorder>) -> Response {
    match recorder.render() {
        Some(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_known_paths() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/files"), "/files");
        assert_eq!(normalize_path("/files/list"), "/files/list");
    }

    #[test]
    fn test_normalize_unknown_paths() {
        assert_eq!(normalize_path("/static/app.css"), "/static");
        assert_eq!(normalize_path("/files/other"), "/other");
        assert_eq!(normalize_path("/wp-admin"), "/other");
    }

    #[test]
    fn test_detached_recorder_cannot_render() {
        assert!(MetricsRecorder::detached().render().is_none());
    }

    #[test]
    fn test_installed_recorder_renders_store_errors() {
        let recorder = MetricsRecorder::install().unwrap();
        recorder.record_store_error("delete", "metrics-test-tenant", "upstream");
        let text = recorder.render().unwrap();
        assert!(text.contains(STORE_ERRORS_TOTAL));
        assert!(text.contains("metrics-test-tenant"));
    }

    #[test]
    fn test_observation_dropped_without_finish_counts_as_500() {
        let recorder = MetricsRecorder::install().unwrap();
        {
            let _obs = RequestObservation::start(
                recorder.clone(),
                "PATCH".to_string(),
                "/dropped-observation".to_string(),
                None,
            );
        }
        let text = recorder.render().unwrap();
        let line = text
            .lines()
            .find(|l| l.starts_with(HTTP_REQUESTS_TOTAL) && l.contains("/dropped-observation"))
            .expect("request counter present");
        assert!(line.contains("status=\"500\""));
    }
}
