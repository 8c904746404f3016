//! Prometheus metrics for Shelfgate.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides a Tower-compatible middleware for
//! HTTP RED metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "shelfgate_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "shelfgate_http_request_duration_seconds";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation to avoid feedback loops.
/// Must be the outermost layer so it captures the full request lifecycle.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    // Do not instrument the metrics endpoint itself.
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Normalize a request path to a bounded label set.
///
/// Every gateway route is a fixed path, so known routes label as
/// themselves; anything else collapses to `/other` to keep label
/// cardinality bounded against scanners and typos.
fn normalize_path(path: &str) -> String {
    const KNOWN: &[&str] = &[
        "/health",
        "/metrics",
        "/api/files/list",
        "/api/files/signed-url",
        "/api/files/metadata",
        "/api/files/exists",
        "/api/files/folder/exists",
        "/api/files/upload-url",
        "/api/files/upload",
        "/api/files/multipart/initiate",
        "/api/files/multipart/part-url",
        "/api/files/multipart/complete",
        "/api/files/multipart/abort",
        "/api/files/multipart/list",
        "/api/files/batch-delete",
        "/api/files/delete",
        "/api/files/copy",
        "/api/files/rename",
        "/api/files/move",
    ];

    if KNOWN.contains(&path) {
        path.to_string()
    } else {
        "/other".to_string()
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> Response {
    render_exposition(PROMETHEUS_HANDLE.get())
}

/// Renders the exposition body, or 503 when no recorder is installed
/// (metrics disabled in config but the route still reached).
fn render_exposition(handle: Option<&PrometheusHandle>) -> Response {
    match handle {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics collection is disabled\n",
        )
            .into_response(),
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_known_routes() {
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/api/files/list"), "/api/files/list");
        assert_eq!(
            normalize_path("/api/files/multipart/complete"),
            "/api/files/multipart/complete"
        );
    }

    #[test]
    fn test_normalize_unknown_routes_collapse() {
        assert_eq!(normalize_path("/"), "/other");
        assert_eq!(normalize_path("/api/files/list/extra"), "/other");
        assert_eq!(normalize_path("/wp-admin.php"), "/other");
    }

    #[test]
    fn test_exposition_without_recorder_is_unavailable() {
        let response = render_exposition(None);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_exposition_with_recorder_is_ok() {
        let response = render_exposition(Some(init_metrics()));
        assert_eq!(response.status(), StatusCode::OK);
    }
}
