//! Self-service account handlers under `/user`.

use crate::auth::Principal;
use crate::errors::UmError;
use crate::models::{
    ChangePasswordRequest, ConfirmRequest, ForgotPasswordRequest, MessageResponse,
    RegisterRequest, ResetPasswordRequest, UserResponse,
};
use crate::routes::AppState;
use crate::services::user_service;
use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use std::sync::Arc;
use tracing::instrument;

/// POST /user/register
#[instrument(skip_all, name = "um.handlers.register")]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), UmError> {
    let user = user_service::register(&state.services, req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// PUT /user/confirm
#[instrument(skip_all, name = "um.handlers.confirm")]
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<MessageResponse>, UmError> {
    user_service::confirm(&state.services, req).await.map(Json)
}

/// POST /user/forget
#[instrument(skip_all, name = "um.handlers.forgot_password")]
pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, UmError> {
    user_service::forgot_password(&state.services, req)
        .await
        .map(Json)
}

/// POST /user/reset
#[instrument(skip_all, name = "um.handlers.reset_password")]
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, UmError> {
    user_service::reset_password(&state.services, req)
        .await
        .map(Json)
}

/// PUT /user/password (authenticated)
#[instrument(skip_all, name = "um.handlers.change_password")]
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, UmError> {
    user_service::change_own_password(&state.services, &principal, req)
        .await
        .map(Json)
}
