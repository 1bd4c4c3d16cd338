//! Tenant hierarchy listings.

use crate::auth::Principal;
use crate::errors::UmError;
use crate::models::UserResponse;
use crate::routes::AppState;
use crate::services::user_service;
use axum::extract::{Path, State};
use axum::{Extension, Json};
use std::sync::Arc;
use tracing::instrument;

/// GET /hierarchy/tenant/:tenant_id/users
///
/// Enabled users of the tenant, any role.
#[instrument(skip_all, name = "um.handlers.tenant_users")]
pub async fn tenant_users(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(tenant_id): Path<String>,
) -> Result<Json<Vec<UserResponse>>, UmError> {
    user_service::list_tenant_users(&state.services, &principal, &tenant_id, None)
        .await
        .map(Json)
}

/// GET /hierarchy/tenant/:tenant_id/users/:role_name
///
/// Enabled, confirmed users of the tenant holding `role_name`.
#[instrument(skip_all, name = "um.handlers.tenant_users_by_role")]
pub async fn tenant_users_by_role(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path((tenant_id, role_name)): Path<(String, String)>,
) -> Result<Json<Vec<UserResponse>>, UmError> {
    user_service::list_tenant_users(&state.services, &principal, &tenant_id, Some(&role_name))
        .await
        .map(Json)
}
