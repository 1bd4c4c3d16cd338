//! Health check handlers.
//!
//! - `/health`: liveness, returns OK while the process is running
//! - `/ready`: readiness, checks the database and that signing keys are loaded

use crate::models::ReadinessResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

/// Liveness check. Touches no dependencies.
pub async fn health_check() -> &'static str {
    "OK"
}

const DEPENDENCIES_UNAVAILABLE: &str = "Service dependencies unavailable";

/// Readiness check.
///
/// Returns 200 when the database answers and a signing key set is cached,
/// 503 otherwise. A cold key cache is loaded here so a lazily refreshed
/// instance can become ready before its first authenticated request.
///
/// Error messages are generic; the cause is logged server-side.
#[tracing::instrument(skip_all, name = "um.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if let Err(e) = sqlx::query("SELECT 1").fetch_one(&state.pool).await {
        tracing::warn!(target: "um.health", error = %e, "Readiness check failed: database error");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                database: Some("unhealthy"),
                jwks: None,
                error: Some(DEPENDENCIES_UNAVAILABLE.to_string()),
            }),
        );
    }

    let keys = state.gate.validator().key_cache();
    if let Err(e) = keys.ensure_loaded().await {
        tracing::warn!(target: "um.health", reason = e.reason(), "Readiness check failed: signing keys unavailable");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                database: Some("healthy"),
                jwks: Some("unavailable"),
                error: Some(DEPENDENCIES_UNAVAILABLE.to_string()),
            }),
        );
    }

    (
        StatusCode::OK,
        Json(ReadinessResponse {
            status: "ready",
            database: Some("healthy"),
            jwks: Some("available"),
            error: None,
        }),
    )
}
