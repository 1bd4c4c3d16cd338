//! Role administration.

use super::events::{ROLE_CREATED, ROLE_DELETED, ROLE_EVENTS, ROLE_UPDATED};
use super::{record_audit, ServiceContext};
use crate::auth::Principal;
use crate::errors::UmError;
use crate::models::{CreateRoleRequest, MessageResponse, Role, RoleResponse};
use crate::repositories::{permissions, roles, users};
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

const ROLES: &str = "roles";

fn role_not_found() -> UmError {
    UmError::NotFound("Role not found".to_string())
}

async fn to_response(ctx: &ServiceContext, role: Role) -> Result<RoleResponse, UmError> {
    let permission_ids = roles::get_permission_ids(&ctx.pool, role.id).await?;
    Ok(RoleResponse {
        role,
        permissions: permission_ids,
    })
}

#[instrument(skip_all, name = "um.services.role.create")]
pub async fn create_role(
    ctx: &ServiceContext,
    actor: &Principal,
    req: CreateRoleRequest,
) -> Result<RoleResponse, UmError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(UmError::BadRequest("Role name is required".to_string()));
    }

    let role = roles::create(&ctx.pool, name, req.description.as_deref(), req.is_default).await?;

    let id = role.id.to_string();
    record_audit(ctx, "CREATE_ROLE", ROLES, &id, &actor.subject, json!({"name": role.name})).await;
    ctx.events
        .publish(ROLE_EVENTS, ROLE_CREATED, json!({"id": id, "name": role.name}))
        .await;

    to_response(ctx, role).await
}

pub async fn list_roles(ctx: &ServiceContext) -> Result<Vec<RoleResponse>, UmError> {
    let all = roles::list(&ctx.pool).await?;
    let mut responses = Vec::with_capacity(all.len());
    for role in all {
        responses.push(to_response(ctx, role).await?);
    }
    Ok(responses)
}

/// Grant a permission to a role. Granting twice is a no-op.
#[instrument(skip_all, name = "um.services.role.add_permission")]
pub async fn add_permission(
    ctx: &ServiceContext,
    actor: &Principal,
    role_id: Uuid,
    permission_id: Uuid,
) -> Result<RoleResponse, UmError> {
    if roles::get_by_id(&ctx.pool, role_id).await?.is_none() {
        return Err(role_not_found());
    }
    if permissions::get_by_id(&ctx.pool, permission_id).await?.is_none() {
        return Err(UmError::NotFound("Permission not found".to_string()));
    }

    if roles::add_permission(&ctx.pool, role_id, permission_id).await? {
        let id = role_id.to_string();
        record_audit(
            ctx,
            "UPDATE_ROLE_PERMS",
            ROLES,
            &id,
            &actor.subject,
            json!({"added": permission_id}),
        )
        .await;
        ctx.events
            .publish(ROLE_EVENTS, ROLE_UPDATED, json!({"id": id, "added": permission_id}))
            .await;
    }

    // Re-read for the touched updated_at
    let role = roles::get_by_id(&ctx.pool, role_id)
        .await?
        .ok_or_else(role_not_found)?;
    to_response(ctx, role).await
}

/// Delete a role that no user holds.
#[instrument(skip_all, name = "um.services.role.delete")]
pub async fn delete_role(
    ctx: &ServiceContext,
    actor: &Principal,
    role_id: Uuid,
) -> Result<MessageResponse, UmError> {
    let role = roles::get_by_id(&ctx.pool, role_id)
        .await?
        .ok_or_else(role_not_found)?;

    if users::count_with_role(&ctx.pool, role_id).await? > 0 {
        return Err(UmError::Conflict(
            "Role is assigned to users, cannot delete".to_string(),
        ));
    }

    if !roles::delete(&ctx.pool, role_id).await? {
        return Err(role_not_found());
    }

    let id = role_id.to_string();
    record_audit(ctx, "DELETE_ROLE", ROLES, &id, &actor.subject, json!({"name": role.name})).await;
    ctx.events
        .publish(ROLE_EVENTS, ROLE_DELETED, json!({"id": id, "name": role.name}))
        .await;

    Ok(MessageResponse::new("Role deleted"))
}
