//! HTTP metrics middleware.
//!
//! Applied as the outermost layer so framework-level rejections (415, 400 on
//! bad JSON, 404, 405) and authentication failures are counted along with
//! handler responses.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::metrics::record_http_request;

/// Record method, normalized path, status and duration for every response.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    record_http_request(&method, &path, response.status().as_u16(), start.elapsed());

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::{get, post},
        Router,
    };
    use tower::ServiceExt;

    async fn ok() -> &'static str {
        "OK"
    }

    async fn unauthorized() -> (StatusCode, &'static str) {
        (StatusCode::UNAUTHORIZED, "no")
    }

    fn test_app() -> Router {
        Router::new()
            .route("/health", get(ok))
            .route("/api/v1/me", get(unauthorized))
            .route("/user/register", post(ok))
            .layer(middleware::from_fn(http_metrics_middleware))
    }

    async fn status_of(method: &str, uri: &str) -> StatusCode {
        let request = HttpRequest::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("request builder should succeed");
        test_app()
            .oneshot(request)
            .await
            .expect("request should succeed")
            .status()
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        assert_eq!(status_of("GET", "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_handler_error_passes_through() {
        assert_eq!(status_of("GET", "/api/v1/me").await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_framework_rejections_pass_through() {
        assert_eq!(status_of("GET", "/nonexistent").await, StatusCode::NOT_FOUND);
        assert_eq!(
            status_of("GET", "/user/register").await,
            StatusCode::METHOD_NOT_ALLOWED
        );
    }
}
