//! Administration handlers under `/admin`. Every route requires `ROLE_ADMIN`,
//! enforced by the `require_role` layer before these run.

use crate::auth::Principal;
use crate::errors::UmError;
use crate::models::{
    ChangePasswordRequest, CreatePermissionRequest, CreateRoleRequest, CreateUserRequest,
    MessageResponse, Permission, PermissionRefRequest, RoleResponse, UpdateUserRequest,
    UserResponse, UserSearchRequest,
};
use crate::routes::AppState;
use crate::services::{permission_service, role_service, user_service};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

type Admin = Extension<Principal>;

// ============================================================================
// Users
// ============================================================================

/// POST /admin/users
#[instrument(skip_all, name = "um.handlers.admin.create_user")]
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(actor): Admin,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), UmError> {
    let user = user_service::create_user(&state.services, &actor, req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /admin/users/invite
#[instrument(skip_all, name = "um.handlers.admin.invite_user")]
pub async fn invite_user(
    State(state): State<Arc<AppState>>,
    Extension(actor): Admin,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), UmError> {
    let user = user_service::invite_user(&state.services, &actor, req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /admin/users/search
#[instrument(skip_all, name = "um.handlers.admin.search_users")]
pub async fn search_users(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UserSearchRequest>,
) -> Result<Json<Vec<UserResponse>>, UmError> {
    user_service::search_users(&state.services, req)
        .await
        .map(Json)
}

/// GET /admin/users/:id
#[instrument(skip_all, name = "um.handlers.admin.get_user")]
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserResponse>, UmError> {
    user_service::get_user(&state.services, user_id)
        .await
        .map(Json)
}

/// PUT /admin/users/:id
#[instrument(skip_all, name = "um.handlers.admin.update_user")]
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Extension(actor): Admin,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, UmError> {
    user_service::update_user(&state.services, &actor, user_id, req)
        .await
        .map(Json)
}

/// DELETE /admin/users/:id
#[instrument(skip_all, name = "um.handlers.admin.delete_user")]
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(actor): Admin,
    Path(user_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, UmError> {
    user_service::delete_user(&state.services, &actor, user_id)
        .await
        .map(Json)
}

/// POST /admin/users/:id/password
#[instrument(skip_all, name = "um.handlers.admin.set_password")]
pub async fn set_user_password(
    State(state): State<Arc<AppState>>,
    Extension(actor): Admin,
    Path(user_id): Path<Uuid>,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, UmError> {
    user_service::admin_set_password(&state.services, &actor, user_id, req)
        .await
        .map(Json)
}

/// POST /admin/users/:id/permissions
#[instrument(skip_all, name = "um.handlers.admin.add_user_permission")]
pub async fn add_user_permission(
    State(state): State<Arc<AppState>>,
    Extension(actor): Admin,
    Path(user_id): Path<Uuid>,
    Json(req): Json<PermissionRefRequest>,
) -> Result<Json<UserResponse>, UmError> {
    user_service::add_permission(&state.services, &actor, user_id, req.permission_id)
        .await
        .map(Json)
}

/// DELETE /admin/users/:id/permissions/:permission_id
#[instrument(skip_all, name = "um.handlers.admin.remove_user_permission")]
pub async fn remove_user_permission(
    State(state): State<Arc<AppState>>,
    Extension(actor): Admin,
    Path((user_id, permission_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<UserResponse>, UmError> {
    user_service::remove_permission(&state.services, &actor, user_id, permission_id)
        .await
        .map(Json)
}

// ============================================================================
// Roles
// ============================================================================

/// GET /admin/roles
pub async fn list_roles(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RoleResponse>>, UmError> {
    role_service::list_roles(&state.services).await.map(Json)
}

/// POST /admin/roles
#[instrument(skip_all, name = "um.handlers.admin.create_role")]
pub async fn create_role(
    State(state): State<Arc<AppState>>,
    Extension(actor): Admin,
    Json(req): Json<CreateRoleRequest>,
) -> Result<(StatusCode, Json<RoleResponse>), UmError> {
    let role = role_service::create_role(&state.services, &actor, req).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// PUT /admin/roles/:id/permissions
#[instrument(skip_all, name = "um.handlers.admin.add_role_permission")]
pub async fn add_role_permission(
    State(state): State<Arc<AppState>>,
    Extension(actor): Admin,
    Path(role_id): Path<Uuid>,
    Json(req): Json<PermissionRefRequest>,
) -> Result<Json<RoleResponse>, UmError> {
    role_service::add_permission(&state.services, &actor, role_id, req.permission_id)
        .await
        .map(Json)
}

/// DELETE /admin/roles/:id
#[instrument(skip_all, name = "um.handlers.admin.delete_role")]
pub async fn delete_role(
    State(state): State<Arc<AppState>>,
    Extension(actor): Admin,
    Path(role_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, UmError> {
    role_service::delete_role(&state.services, &actor, role_id)
        .await
        .map(Json)
}

// ============================================================================
// Permissions
// ============================================================================

/// GET /admin/permissions
pub async fn list_permissions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Permission>>, UmError> {
    permission_service::list_permissions(&state.services)
        .await
        .map(Json)
}

/// POST /admin/permissions
#[instrument(skip_all, name = "um.handlers.admin.create_permission")]
pub async fn create_permission(
    State(state): State<Arc<AppState>>,
    Extension(actor): Admin,
    Json(req): Json<CreatePermissionRequest>,
) -> Result<(StatusCode, Json<Permission>), UmError> {
    let permission = permission_service::create_permission(&state.services, &actor, req).await?;
    Ok((StatusCode::CREATED, Json(permission)))
}

/// DELETE /admin/permissions/:id
#[instrument(skip_all, name = "um.handlers.admin.delete_permission")]
pub async fn delete_permission(
    State(state): State<Arc<AppState>>,
    Extension(actor): Admin,
    Path(permission_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, UmError> {
    permission_service::delete_permission(&state.services, &actor, permission_id)
        .await
        .map(Json)
}
