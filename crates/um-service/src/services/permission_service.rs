//! Permission administration.

use super::events::{PERMISSION_CREATED, PERMISSION_DELETED, ROLE_EVENTS};
use super::{record_audit, ServiceContext};
use crate::auth::Principal;
use crate::errors::UmError;
use crate::models::{CreatePermissionRequest, MessageResponse, Permission};
use crate::repositories::permissions;
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

const PERMISSIONS: &str = "permissions";

#[instrument(skip_all, name = "um.services.permission.create")]
pub async fn create_permission(
    ctx: &ServiceContext,
    actor: &Principal,
    req: CreatePermissionRequest,
) -> Result<Permission, UmError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(UmError::BadRequest("Permission name is required".to_string()));
    }

    let permission = permissions::create(&ctx.pool, name, req.description.as_deref()).await?;

    let id = permission.id.to_string();
    record_audit(
        ctx,
        "CREATE_PERMISSION",
        PERMISSIONS,
        &id,
        &actor.subject,
        json!({"name": permission.name}),
    )
    .await;
    ctx.events
        .publish(
            ROLE_EVENTS,
            PERMISSION_CREATED,
            json!({"id": id, "name": permission.name}),
        )
        .await;

    Ok(permission)
}

pub async fn list_permissions(ctx: &ServiceContext) -> Result<Vec<Permission>, UmError> {
    permissions::list(&ctx.pool).await
}

/// Delete a permission and every grant of it.
#[instrument(skip_all, name = "um.services.permission.delete")]
pub async fn delete_permission(
    ctx: &ServiceContext,
    actor: &Principal,
    permission_id: Uuid,
) -> Result<MessageResponse, UmError> {
    if !permissions::delete(&ctx.pool, permission_id).await? {
        return Err(UmError::NotFound("Permission not found".to_string()));
    }

    let id = permission_id.to_string();
    record_audit(ctx, "DELETE_PERMISSION", PERMISSIONS, &id, &actor.subject, json!({})).await;
    ctx.events
        .publish(ROLE_EVENTS, PERMISSION_DELETED, json!({"id": id}))
        .await;

    Ok(MessageResponse::new("Permission deleted"))
}
