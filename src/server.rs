//! Axum router construction and gateway route mapping.
//!
//! The [`app`] function wires every gateway endpoint to its handler and
//! returns a ready-to-serve [`axum::Router`].  Every route under
//! `/api/files` except the signed GET URL requires a bearer token; the
//! infrastructure endpoints (`/health`, `/metrics`) are open.

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::auth::extract_bearer;
use crate::errors::{generate_request_id, GatewayError};
use crate::handlers::{files, multipart};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

/// Build the axum [`Router`] with all gateway routes.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    // Infrastructure endpoints honor the observability toggles.
    let mut router = Router::new();
    if state.config.observability.health_check {
        router = router.route("/health", get(health_check));
    }
    if state.config.observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        // Listing and lookups.
        .route("/api/files/list", get(files::list_files))
        .route("/api/files/signed-url", get(files::signed_get_url))
        .route("/api/files/metadata", get(files::file_metadata))
        .route("/api/files/exists", get(files::file_exists))
        .route("/api/files/folder/exists", get(files::folder_exists))
        // Uploads.
        .route("/api/files/upload-url", post(files::request_upload_url))
        .route("/api/files/upload", put(files::upload_file))
        .route(
            "/api/files/multipart/initiate",
            post(multipart::initiate_upload),
        )
        .route(
            "/api/files/multipart/part-url",
            post(multipart::get_part_url),
        )
        .route(
            "/api/files/multipart/complete",
            post(multipart::complete_upload),
        )
        .route("/api/files/multipart/abort", post(multipart::abort_upload))
        .route("/api/files/multipart/list", get(multipart::list_uploads))
        // Mutations.
        .route("/api/files/batch-delete", post(files::batch_delete))
        .route("/api/files/delete", delete(files::delete_file))
        .route("/api/files/copy", post(files::copy_file))
        .route("/api/files/rename", post(files::rename_file))
        .route("/api/files/move", post(files::move_file))
        // Application state shared across all handlers.
        .with_state(state.clone())
        // Layer ordering: inner layers run first, outer layers wrap them.
        // auth_middleware is innermost (closest to handlers, after routing).
        .layer(middleware::from_fn_with_state(state, auth_middleware))
        // common_headers_middleware is next (adds standard headers).
        .layer(middleware::from_fn(common_headers_middleware))
        // metrics_middleware is outer (captures full request lifecycle).
        .layer(middleware::from_fn(metrics_middleware))
        // Reader apps call the gateway cross-origin.
        .layer(CorsLayer::permissive())
        // Inline uploads can exceed the default 2MB body limit.
        .layer(DefaultBodyLimit::disable())
}

// -- Common headers middleware -----------------------------------------------

/// Adds standard response headers to every response:
/// - `x-request-id`: 16-character uppercase hex string
/// - `Date`: RFC 7231 formatted timestamp
/// - `Server`: `Shelfgate`
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    // Only set x-request-id if not already present (the error responder
    // may set it).
    if !headers.contains_key("x-request-id") {
        let request_id = generate_request_id();
        headers.insert("x-request-id", HeaderValue::from_str(&request_id).unwrap());
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    headers.insert("date", HeaderValue::from_str(&date).unwrap());
    headers.insert("server", HeaderValue::from_static("Shelfgate"));

    response
}

// -- Auth middleware ---------------------------------------------------------

/// Paths that bypass authentication: infrastructure endpoints plus the
/// public signed GET URL route.
const AUTH_SKIP_PATHS: &[&str] = &["/health", "/metrics", "/api/files/signed-url"];

/// Bearer-token middleware. Runs before handlers; extracts the token and
/// asks the configured verifier. Missing or rejected tokens are 401.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, GatewayError> {
    let path = req.uri().path();
    if AUTH_SKIP_PATHS.contains(&path) {
        return Ok(next.run(req).await);
    }

    let token = extract_bearer(req.headers())
        .map(|t| t.to_string())
        .ok_or_else(|| GatewayError::Unauthorized {
            message: "missing bearer token".to_string(),
        })?;

    let accepted = state
        .verifier
        .verify(&token)
        .await
        .map_err(GatewayError::Backend)?;
    if !accepted {
        warn!(path = %path, "rejected bearer token");
        return Err(GatewayError::Unauthorized {
            message: "invalid bearer token".to_string(),
        });
    }

    Ok(next.run(req).await)
}

// -- Health check -------------------------------------------------------------

/// `GET /health` -- liveness probe.
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "ok", "service": "shelfgate" })),
    )
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenVerifier;
    use crate::config::Config;
    use crate::session::memory::MemorySessionStore;
    use crate::storage::driver::ObjectStoreDriver;
    use crate::storage::memory::MemoryDriver;
    use axum::body::Body;
    use tower::ServiceExt;

    const TOKEN: &str = "test-token";

    fn test_app_with(config: Config) -> (Arc<MemoryDriver>, Router) {
        let driver = Arc::new(MemoryDriver::new());
        let state = Arc::new(AppState::new(
            config,
            driver.clone(),
            Arc::new(MemorySessionStore::new()),
            Arc::new(StaticTokenVerifier::new(TOKEN)),
        ));
        (driver, app(state))
    }

    fn test_app() -> (Arc<MemoryDriver>, Router) {
        test_app_with(Config::default())
    }

    fn authed(req: axum::http::request::Builder) -> axum::http::request::Builder {
        req.header("authorization", format!("Bearer {TOKEN}"))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_open() {
        let (_, app) = test_app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("server").unwrap(),
            &HeaderValue::from_static("Shelfgate")
        );
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_disabled_infrastructure_routes_are_absent() {
        let mut config = Config::default();
        config.observability.health_check = false;
        config.observability.metrics = false;
        let (_, app) = test_app_with(config);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_protected_route_requires_token() {
        let (_, app) = test_app();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/files/exists?fileKey=k")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["code"], "Unauthorized");

        // Wrong token is rejected the same way.
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/files/exists?fileKey=k")
                    .header("authorization", "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_signed_url_is_anonymous() {
        let (_, app) = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/files/signed-url?fileKey=books/1/a.mp3")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["fileKey"], "books/1/a.mp3");
        assert!(json["url"].as_str().unwrap().starts_with("https://"));
    }

    #[tokio::test]
    async fn test_metadata_not_found_is_404() {
        let (_, app) = test_app();
        let response = app
            .oneshot(
                authed(Request::builder().uri("/api/files/metadata?fileKey=ghost"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["code"], "NotFound");
        assert!(json["requestId"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_batch_delete_partial_failure_is_200() {
        let (driver, app) = test_app();
        driver.seed("a", b"1", None).await;
        driver.seed("b", b"2", None).await;
        driver.deny("b").await;

        let body = serde_json::json!({ "fileKeys": ["a", "b"] }).to_string();
        let response = app
            .oneshot(
                authed(
                    Request::builder()
                        .method("POST")
                        .uri("/api/files/batch-delete")
                        .header("content-type", "application/json"),
                )
                .body(Body::from(body))
                .unwrap(),
            )
            .await
            .unwrap();

        // Partial failure is not an error status; the body carries it.
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["deletedCount"], 1);
        assert_eq!(json["deleted"][0]["fileKey"], "a");
        assert_eq!(json["errors"][0]["fileKey"], "b");
        assert_eq!(json["errors"][0]["code"], "AccessDenied");
    }

    #[tokio::test]
    async fn test_complete_after_abort_is_409() {
        let (_, app) = test_app();

        let body = serde_json::json!({ "fileKey": "k", "fileSize": 10 }).to_string();
        let response = app
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method("POST")
                        .uri("/api/files/multipart/initiate")
                        .header("content-type", "application/json"),
                )
                .body(Body::from(body))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let upload_id = body_json(response).await["uploadId"]
            .as_str()
            .unwrap()
            .to_string();

        let body = serde_json::json!({ "uploadId": upload_id, "fileKey": "k" }).to_string();
        let response = app
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method("POST")
                        .uri("/api/files/multipart/abort")
                        .header("content-type", "application/json"),
                )
                .body(Body::from(body))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = serde_json::json!({
            "uploadId": upload_id,
            "fileKey": "k",
            "parts": [{ "partNumber": 1, "eTag": "\"a\"" }]
        })
        .to_string();
        let response = app
            .oneshot(
                authed(
                    Request::builder()
                        .method("POST")
                        .uri("/api/files/multipart/complete")
                        .header("content-type", "application/json"),
                )
                .body(Body::from(body))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["code"], "Conflict");
    }

    #[tokio::test]
    async fn test_inline_upload_roundtrip() {
        let (driver, app) = test_app();

        let body = serde_json::json!({
            "fileKey": "books/2/notes.txt",
            "contentType": "text/plain",
            "content": "aGVsbG8gd29ybGQ="
        })
        .to_string();
        let response = app
            .oneshot(
                authed(
                    Request::builder()
                        .method("PUT")
                        .uri("/api/files/upload")
                        .header("content-type", "application/json"),
                )
                .body(Body::from(body))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["contentLength"], 11);
        assert_eq!(json["fileKey"], "books/2/notes.txt");

        let stored = driver
            .head_object("books/2/notes.txt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.content_length, Some(11));
    }

    #[tokio::test]
    async fn test_invalid_continuation_token_is_400() {
        let (driver, app) = test_app();
        driver.seed("lib/a", b"1", None).await;

        let response = app
            .oneshot(
                authed(Request::builder().uri(
                    "/api/files/list?storagePath=lib/&continuationToken=bogus-token",
                ))
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "ValidationError");
    }
}
