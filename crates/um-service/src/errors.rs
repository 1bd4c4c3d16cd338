//! User Management Service error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl. Messages
//! returned to clients are generic where detail would leak internals; the
//! actual cause is logged server-side.

use crate::auth::AuthError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Client-facing message for every authentication failure.
pub const INVALID_TOKEN_MESSAGE: &str = "The access token is invalid or expired";

/// Client-facing message for every authorization failure.
pub const FORBIDDEN_MESSAGE: &str = "Insufficient privileges";

/// Service error type.
///
/// Maps to HTTP status codes:
/// - Database, Internal: 500 Internal Server Error
/// - InvalidToken: 401 Unauthorized
/// - Forbidden: 403 Forbidden
/// - NotFound: 404 Not Found
/// - Conflict: 409 Conflict
/// - BadRequest: 400 Bad Request
/// - ServiceUnavailable: 503 Service Unavailable
#[derive(Debug, Error)]
pub enum UmError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error")]
    Internal,
}

impl UmError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            UmError::Database(_) | UmError::Internal => 500,
            UmError::InvalidToken(_) => 401,
            UmError::Forbidden(_) => 403,
            UmError::NotFound(_) => 404,
            UmError::Conflict(_) => 409,
            UmError::BadRequest(_) => 400,
            UmError::ServiceUnavailable(_) => 503,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for UmError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            UmError::Database(err) => {
                tracing::error!(target: "um.database", error = %err, "Database operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            UmError::InvalidToken(reason) => {
                (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", reason.clone())
            }
            UmError::Forbidden(reason) => (StatusCode::FORBIDDEN, "FORBIDDEN", reason.clone()),
            UmError::NotFound(resource) => (StatusCode::NOT_FOUND, "NOT_FOUND", resource.clone()),
            UmError::Conflict(reason) => (StatusCode::CONFLICT, "CONFLICT", reason.clone()),
            UmError::BadRequest(reason) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone()),
            UmError::ServiceUnavailable(reason) => {
                tracing::warn!(target: "um.availability", reason = %reason, "Service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                )
            }
            UmError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) =
                "Bearer realm=\"user-management\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

impl From<sqlx::Error> for UmError {
    fn from(err: sqlx::Error) -> Self {
        UmError::Database(err.to_string())
    }
}

/// Authentication failures collapse to one generic 401; the reason was
/// already logged by the validator. Authorization failures become 403.
impl From<AuthError> for UmError {
    fn from(err: AuthError) -> Self {
        if err.is_forbidden() {
            UmError::Forbidden(FORBIDDEN_MESSAGE.to_string())
        } else {
            UmError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_display() {
        assert_eq!(
            UmError::Database("connection failed".to_string()).to_string(),
            "Database error: connection failed"
        );
        assert_eq!(
            UmError::NotFound("user".to_string()).to_string(),
            "Not found: user"
        );
        assert_eq!(UmError::Internal.to_string(), "Internal server error");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(UmError::Database("x".to_string()).status_code(), 500);
        assert_eq!(UmError::InvalidToken("x".to_string()).status_code(), 401);
        assert_eq!(UmError::Forbidden("x".to_string()).status_code(), 403);
        assert_eq!(UmError::NotFound("x".to_string()).status_code(), 404);
        assert_eq!(UmError::Conflict("x".to_string()).status_code(), 409);
        assert_eq!(UmError::BadRequest("x".to_string()).status_code(), 400);
        assert_eq!(UmError::ServiceUnavailable("x".to_string()).status_code(), 503);
        assert_eq!(UmError::Internal.status_code(), 500);
    }

    #[tokio::test]
    async fn test_unauthorized_response_has_www_authenticate() {
        let response = UmError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string()).into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let header = response
            .headers()
            .get("WWW-Authenticate")
            .expect("401 must carry WWW-Authenticate")
            .to_str()
            .unwrap();
        assert!(header.starts_with("Bearer"));
        assert!(header.contains("invalid_token"));

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "INVALID_TOKEN");
        assert_eq!(body["error"]["message"], INVALID_TOKEN_MESSAGE);
    }

    #[tokio::test]
    async fn test_forbidden_response_has_no_www_authenticate() {
        let response = UmError::Forbidden(FORBIDDEN_MESSAGE.to_string()).into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get("WWW-Authenticate").is_none());

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_database_error_is_not_leaked() {
        let response =
            UmError::Database("relation \"users\" does not exist".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["message"], "An internal database error occurred");
    }

    #[tokio::test]
    async fn test_service_unavailable_is_generic() {
        let response = UmError::ServiceUnavailable("redis at 10.0.0.7 down".to_string())
            .into_response();
        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["message"], "Service temporarily unavailable");
    }

    #[test]
    fn test_auth_errors_collapse_to_generic_messages() {
        let cases = [
            AuthError::MissingToken,
            AuthError::TokenExpired,
            AuthError::UnknownSigningKey,
            AuthError::KeyUnavailable,
            AuthError::ReplayDetected,
            AuthError::UnsupportedAlgorithm,
        ];
        for err in cases {
            match UmError::from(err) {
                UmError::InvalidToken(msg) => assert_eq!(msg, INVALID_TOKEN_MESSAGE),
                other => panic!("expected InvalidToken, got {other:?}"),
            }
        }

        match UmError::from(AuthError::Forbidden) {
            UmError::Forbidden(msg) => assert_eq!(msg, FORBIDDEN_MESSAGE),
            other => panic!("expected Forbidden, got {other:?}"),
        }
    }
}
