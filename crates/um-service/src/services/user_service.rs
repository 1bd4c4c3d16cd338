//! User lifecycle: registration, confirmation, administration and passwords.
//!
//! Every mutation writes an audit event and publishes a domain event on the
//! `user_events` stream. Both are best-effort.

use super::email::OtpPurpose;
use super::events::{
    USER_CONFIRMED, USER_CREATED, USER_DELETED, USER_EVENTS, USER_INVITED,
    USER_PASSWORD_CHANGED, USER_PERMISSIONS_CHANGED, USER_UPDATED,
};
use super::{
    hash_password, normalize_email, otp, record_audit, validate_password, ServiceContext,
    ACTOR_SELF,
};
use crate::auth::Principal;
use crate::errors::{UmError, FORBIDDEN_MESSAGE};
use crate::models::{
    ChangePasswordRequest, ConfirmRequest, CreateUserRequest, ForgotPasswordRequest,
    MessageResponse, RegisterRequest, ResetPasswordRequest, Role, UpdateUserRequest, User,
    UserResponse, UserSearchRequest, DEFAULT_TENANT, ROLE_ADMIN,
};
use crate::repositories::users::{
    NewUser, UserChanges, UserFilter, DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT,
};
use crate::repositories::{self, permissions, roles, users};
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

/// `performed_by` for password resets through the emailed passcode.
pub const ACTOR_SELF_RESET: &str = "SELF_RESET";

/// Response to a forgot-password request, whether or not the account exists.
pub const FORGOT_PASSWORD_MESSAGE: &str = "If email exists, OTP sent";

const USERS: &str = "users";

fn user_not_found() -> UmError {
    UmError::NotFound("User not found".to_string())
}

fn invalid_otp() -> UmError {
    UmError::BadRequest("Invalid OTP".to_string())
}

/// Attach role names and direct permission IDs.
pub async fn to_response(ctx: &ServiceContext, user: User) -> Result<UserResponse, UmError> {
    let role_names = users::get_role_names(&ctx.pool, user.id).await?;
    let permission_ids = users::get_permission_ids(&ctx.pool, user.id).await?;
    Ok(UserResponse {
        user,
        roles: role_names,
        permissions: permission_ids,
    })
}

/// Resolve role names, failing on the first unknown name.
async fn resolve_roles(ctx: &ServiceContext, names: &[String]) -> Result<Vec<Role>, UmError> {
    let found = roles::get_by_names(&ctx.pool, names).await?;
    if let Some(missing) = names.iter().find(|n| !found.iter().any(|r| &r.name == *n)) {
        return Err(UmError::BadRequest(format!("Unknown role: {missing}")));
    }
    Ok(found)
}

/// Explicit roles when given, otherwise the roles flagged as default.
async fn initial_roles(ctx: &ServiceContext, names: &[String]) -> Result<Vec<Role>, UmError> {
    if names.is_empty() {
        roles::list_default(&ctx.pool).await
    } else {
        resolve_roles(ctx, names).await
    }
}

async fn ensure_email_free(ctx: &ServiceContext, email: &str) -> Result<(), UmError> {
    if users::get_by_email(&ctx.pool, email).await?.is_some() {
        return Err(UmError::Conflict("Email already exists".to_string()));
    }
    Ok(())
}

async fn send_passcode(
    ctx: &ServiceContext,
    email: &str,
    purpose: OtpPurpose,
) -> Result<(), UmError> {
    let code = otp::issue(ctx.otp_store.as_ref(), email, ctx.otp_ttl).await?;
    ctx.email.send_otp(email, &code, purpose).await
}

fn tenant_or(requested: Option<String>, fallback: &str) -> String {
    requested
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// Parse the caller's subject as a user ID.
fn subject_user_id(principal: &Principal) -> Result<Uuid, UmError> {
    Uuid::parse_str(&principal.subject).map_err(|_| user_not_found())
}

/// Self-registration. The account starts unconfirmed and a passcode is
/// emailed to confirm it.
#[instrument(skip_all, name = "um.services.user.register")]
pub async fn register(ctx: &ServiceContext, req: RegisterRequest) -> Result<UserResponse, UmError> {
    let email = normalize_email(&req.email)?;
    validate_password(&req.password)?;
    ensure_email_free(ctx, &email).await?;

    let password_hash = hash_password(&req.password, ctx.bcrypt_cost).await?;
    let tenant_id = tenant_or(req.tenant_id, DEFAULT_TENANT);

    let default_roles = roles::list_default(&ctx.pool).await?;

    // The account only exists once its passcode has been delivered.
    let mut tx = repositories::begin(&ctx.pool).await?;
    let user = users::create(
        &mut *tx,
        &NewUser {
            first_name: req.first_name.trim().to_string(),
            last_name: req.last_name.trim().to_string(),
            gender: None,
            email: email.clone(),
            phone: None,
            password_hash,
            confirmed: false,
            tenant_id: tenant_id.clone(),
            timezone: None,
            attributes: json!({"status": "Pending"}),
            created_by: Some(ACTOR_SELF.to_string()),
        },
    )
    .await?;

    if !default_roles.is_empty() {
        let ids: Vec<Uuid> = default_roles.iter().map(|r| r.id).collect();
        users::replace_roles(&mut tx, user.id, &ids).await?;
    }

    send_passcode(ctx, &email, OtpPurpose::Registration).await?;
    repositories::commit(tx).await?;

    let user_id = user.id.to_string();
    record_audit(ctx, "REGISTER_SELF", USERS, &user_id, ACTOR_SELF, json!({"tenantId": tenant_id}))
        .await;
    ctx.events
        .publish(
            USER_EVENTS,
            USER_CREATED,
            json!({"id": user_id, "tenantId": tenant_id, "confirmed": false}),
        )
        .await;

    tracing::info!(target: "um.services.user", user_id = %user.id, "User registered");
    to_response(ctx, user).await
}

/// Confirm an account with its emailed passcode.
#[instrument(skip_all, name = "um.services.user.confirm")]
pub async fn confirm(ctx: &ServiceContext, req: ConfirmRequest) -> Result<MessageResponse, UmError> {
    let email = normalize_email(&req.email)?;
    if !ctx.otp_store.consume(&email, &req.otp).await? {
        return Err(invalid_otp());
    }

    let user = users::get_by_email(&ctx.pool, &email)
        .await?
        .filter(|u| !u.is_deleted())
        .ok_or_else(user_not_found)?;

    if !users::mark_confirmed(&ctx.pool, user.id).await? {
        return Err(user_not_found());
    }

    let user_id = user.id.to_string();
    record_audit(ctx, "CONFIRM_USER", USERS, &user_id, ACTOR_SELF, json!({})).await;
    ctx.events
        .publish(USER_EVENTS, USER_CONFIRMED, json!({"id": user_id}))
        .await;

    Ok(MessageResponse::new("User confirmed"))
}

/// Insert the user and its roles in one transaction. With `passcode`, the
/// code is delivered before commit; a failed delivery leaves no account.
async fn create_with_roles(
    ctx: &ServiceContext,
    actor: &Principal,
    req: CreateUserRequest,
    passcode: Option<OtpPurpose>,
) -> Result<User, UmError> {
    let confirmed = passcode.is_none();
    let email = normalize_email(&req.email)?;
    validate_password(&req.password)?;
    if req.first_name.trim().is_empty() {
        return Err(UmError::BadRequest("firstName is required".to_string()));
    }
    if let Some(attributes) = &req.attributes {
        if !attributes.is_object() {
            return Err(UmError::BadRequest("attributes must be an object".to_string()));
        }
    }

    let assigned = initial_roles(ctx, &req.roles).await?;
    ensure_email_free(ctx, &email).await?;
    let password_hash = hash_password(&req.password, ctx.bcrypt_cost).await?;

    let fallback_tenant = actor.tenant.as_deref().unwrap_or(DEFAULT_TENANT);
    let mut attributes = req.attributes.unwrap_or_else(|| json!({}));
    if let Some(map) = attributes.as_object_mut() {
        let status = if confirmed { "Active" } else { "Pending" };
        map.insert("status".to_string(), json!(status));
    }

    let mut tx = repositories::begin(&ctx.pool).await?;
    let user = users::create(
        &mut *tx,
        &NewUser {
            first_name: req.first_name.trim().to_string(),
            last_name: req.last_name.trim().to_string(),
            gender: req.gender,
            email,
            phone: req.phone,
            password_hash,
            confirmed,
            tenant_id: tenant_or(req.tenant_id, fallback_tenant),
            timezone: req.timezone,
            attributes,
            created_by: Some(actor.subject.clone()),
        },
    )
    .await?;

    if !assigned.is_empty() {
        let ids: Vec<Uuid> = assigned.iter().map(|r| r.id).collect();
        users::replace_roles(&mut tx, user.id, &ids).await?;
    }

    if let Some(purpose) = passcode {
        send_passcode(ctx, &user.email, purpose).await?;
    }
    repositories::commit(tx).await?;

    Ok(user)
}

/// Administrator-created account, confirmed immediately.
#[instrument(skip_all, name = "um.services.user.create")]
pub async fn create_user(
    ctx: &ServiceContext,
    actor: &Principal,
    req: CreateUserRequest,
) -> Result<UserResponse, UmError> {
    let user = create_with_roles(ctx, actor, req, None).await?;

    let user_id = user.id.to_string();
    record_audit(
        ctx,
        "CREATE_USER",
        USERS,
        &user_id,
        &actor.subject,
        json!({"tenantId": user.tenant_id}),
    )
    .await;
    ctx.events
        .publish(
            USER_EVENTS,
            USER_CREATED,
            json!({"id": user_id, "tenantId": user.tenant_id, "confirmed": true}),
        )
        .await;

    to_response(ctx, user).await
}

/// Administrator invitation. The account starts unconfirmed and the invitee
/// confirms it with the emailed passcode.
#[instrument(skip_all, name = "um.services.user.invite")]
pub async fn invite_user(
    ctx: &ServiceContext,
    actor: &Principal,
    req: CreateUserRequest,
) -> Result<UserResponse, UmError> {
    let user = create_with_roles(ctx, actor, req, Some(OtpPurpose::Invitation)).await?;

    let user_id = user.id.to_string();
    record_audit(
        ctx,
        "INVITE_USER",
        USERS,
        &user_id,
        &actor.subject,
        json!({"tenantId": user.tenant_id}),
    )
    .await;
    ctx.events
        .publish(
            USER_EVENTS,
            USER_INVITED,
            json!({"id": user_id, "tenantId": user.tenant_id}),
        )
        .await;

    to_response(ctx, user).await
}

pub async fn get_user(ctx: &ServiceContext, user_id: Uuid) -> Result<UserResponse, UmError> {
    let user = users::get_by_id(&ctx.pool, user_id)
        .await?
        .ok_or_else(user_not_found)?;
    to_response(ctx, user).await
}

#[instrument(skip_all, name = "um.services.user.search")]
pub async fn search_users(
    ctx: &ServiceContext,
    req: UserSearchRequest,
) -> Result<Vec<UserResponse>, UmError> {
    let limit = req.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    if !(1..=MAX_SEARCH_LIMIT).contains(&limit) {
        return Err(UmError::BadRequest(format!(
            "limit must be between 1 and {MAX_SEARCH_LIMIT}"
        )));
    }
    let offset = req.offset.unwrap_or(0);
    if offset < 0 {
        return Err(UmError::BadRequest("offset must not be negative".to_string()));
    }

    let email = match req.email.as_deref() {
        Some(e) if !e.trim().is_empty() => Some(e.trim().to_lowercase()),
        _ => None,
    };

    let filter = UserFilter {
        name: req.name.filter(|n| !n.trim().is_empty()),
        tenant_id: req.tenant_id.filter(|t| !t.trim().is_empty()),
        role_name: req.role.filter(|r| !r.trim().is_empty()),
        enabled: req.enabled,
        confirmed: req.confirmed,
        email,
        limit,
        offset,
    };

    let found = users::search(&ctx.pool, &filter).await?;
    let mut responses = Vec::with_capacity(found.len());
    for user in found {
        responses.push(to_response(ctx, user).await?);
    }
    Ok(responses)
}

/// Apply whitelisted profile changes and, optionally, replace the role set.
#[instrument(skip_all, name = "um.services.user.update")]
pub async fn update_user(
    ctx: &ServiceContext,
    actor: &Principal,
    user_id: Uuid,
    req: UpdateUserRequest,
) -> Result<UserResponse, UmError> {
    if req.is_empty() {
        return Err(UmError::BadRequest("No fields to update".to_string()));
    }
    if let Some(attributes) = &req.attributes {
        if !attributes.is_object() {
            return Err(UmError::BadRequest("attributes must be an object".to_string()));
        }
    }

    let new_roles = match &req.roles {
        Some(names) => Some(resolve_roles(ctx, names).await?),
        None => None,
    };

    let mut changed: Vec<&str> = Vec::new();
    for (field, present) in [
        ("firstName", req.first_name.is_some()),
        ("lastName", req.last_name.is_some()),
        ("gender", req.gender.is_some()),
        ("phone", req.phone.is_some()),
        ("timezone", req.timezone.is_some()),
        ("enabled", req.enabled.is_some()),
        ("attributes", req.attributes.is_some()),
        ("roles", req.roles.is_some()),
    ] {
        if present {
            changed.push(field);
        }
    }

    let changes = UserChanges {
        first_name: req.first_name,
        last_name: req.last_name,
        gender: req.gender,
        phone: req.phone,
        timezone: req.timezone,
        enabled: req.enabled,
        attributes: req.attributes,
    };

    let user = users::update(&ctx.pool, user_id, &changes, &actor.subject)
        .await?
        .ok_or_else(user_not_found)?;

    if let Some(new_roles) = new_roles {
        let ids: Vec<Uuid> = new_roles.iter().map(|r| r.id).collect();
        users::set_roles(&ctx.pool, user_id, &ids).await?;
    }

    let id = user_id.to_string();
    record_audit(ctx, "UPDATE_USER", USERS, &id, &actor.subject, json!({"fields": changed})).await;
    ctx.events
        .publish(USER_EVENTS, USER_UPDATED, json!({"id": id, "fields": changed}))
        .await;

    to_response(ctx, user).await
}

async fn set_password(
    ctx: &ServiceContext,
    user_id: Uuid,
    password: &common::secret::SecretString,
    performed_by: &str,
) -> Result<(), UmError> {
    let password_hash = hash_password(password, ctx.bcrypt_cost).await?;
    if !users::update_password(&ctx.pool, user_id, &password_hash, performed_by).await? {
        return Err(user_not_found());
    }

    let id = user_id.to_string();
    record_audit(ctx, "CHANGE_PASSWORD", USERS, &id, performed_by, json!({})).await;
    ctx.events
        .publish(USER_EVENTS, USER_PASSWORD_CHANGED, json!({"id": id}))
        .await;
    Ok(())
}

/// The caller changes their own password.
#[instrument(skip_all, name = "um.services.user.change_own_password")]
pub async fn change_own_password(
    ctx: &ServiceContext,
    principal: &Principal,
    req: ChangePasswordRequest,
) -> Result<MessageResponse, UmError> {
    let user_id = subject_user_id(principal)?;
    set_password(ctx, user_id, &req.password, &principal.subject).await?;
    Ok(MessageResponse::new("Password updated"))
}

/// An administrator sets another user's password.
#[instrument(skip_all, name = "um.services.user.admin_set_password")]
pub async fn admin_set_password(
    ctx: &ServiceContext,
    actor: &Principal,
    user_id: Uuid,
    req: ChangePasswordRequest,
) -> Result<MessageResponse, UmError> {
    set_password(ctx, user_id, &req.password, &actor.subject).await?;
    Ok(MessageResponse::new("Password updated"))
}

/// Start a password reset. The response never reveals whether the account
/// exists, and passcode delivery failures are only logged.
#[instrument(skip_all, name = "um.services.user.forgot_password")]
pub async fn forgot_password(
    ctx: &ServiceContext,
    req: ForgotPasswordRequest,
) -> Result<MessageResponse, UmError> {
    let email = normalize_email(&req.email)?;

    let eligible = users::get_by_email(&ctx.pool, &email)
        .await?
        .is_some_and(|u| !u.is_deleted() && u.enabled);

    if eligible {
        if let Err(e) = send_passcode(ctx, &email, OtpPurpose::PasswordReset).await {
            tracing::warn!(target: "um.services.user", error = %e, "Failed to send reset passcode");
        }
    }

    Ok(MessageResponse::new(FORGOT_PASSWORD_MESSAGE))
}

/// Finish a password reset with the emailed passcode.
#[instrument(skip_all, name = "um.services.user.reset_password")]
pub async fn reset_password(
    ctx: &ServiceContext,
    req: ResetPasswordRequest,
) -> Result<MessageResponse, UmError> {
    let email = normalize_email(&req.email)?;
    validate_password(&req.password)?;

    if !ctx.otp_store.consume(&email, &req.otp).await? {
        return Err(invalid_otp());
    }

    let user = users::get_by_email(&ctx.pool, &email)
        .await?
        .filter(|u| !u.is_deleted())
        .ok_or_else(|| UmError::BadRequest("User not found".to_string()))?;

    set_password(ctx, user.id, &req.password, ACTOR_SELF_RESET).await?;
    Ok(MessageResponse::new("Password reset successfully"))
}

#[instrument(skip_all, name = "um.services.user.delete")]
pub async fn delete_user(
    ctx: &ServiceContext,
    actor: &Principal,
    user_id: Uuid,
) -> Result<MessageResponse, UmError> {
    if !users::soft_delete(&ctx.pool, user_id, &actor.subject).await? {
        return Err(user_not_found());
    }

    let id = user_id.to_string();
    record_audit(ctx, "DELETE_USER", USERS, &id, &actor.subject, json!({})).await;
    ctx.events
        .publish(USER_EVENTS, USER_DELETED, json!({"id": id}))
        .await;

    Ok(MessageResponse::new("User deleted"))
}

/// Grant a permission directly. Granting an already-held permission is a no-op.
#[instrument(skip_all, name = "um.services.user.add_permission")]
pub async fn add_permission(
    ctx: &ServiceContext,
    actor: &Principal,
    user_id: Uuid,
    permission_id: Uuid,
) -> Result<UserResponse, UmError> {
    let user = users::get_by_id(&ctx.pool, user_id)
        .await?
        .ok_or_else(user_not_found)?;
    if permissions::get_by_id(&ctx.pool, permission_id).await?.is_none() {
        return Err(UmError::NotFound("Permission not found".to_string()));
    }

    if users::add_permission(&ctx.pool, user_id, permission_id).await? {
        let id = user_id.to_string();
        record_audit(
            ctx,
            "ADD_USER_PERMISSION",
            USERS,
            &id,
            &actor.subject,
            json!({"permission": permission_id}),
        )
        .await;
        ctx.events
            .publish(
                USER_EVENTS,
                USER_PERMISSIONS_CHANGED,
                json!({"id": id, "added": permission_id}),
            )
            .await;
    }

    to_response(ctx, user).await
}

#[instrument(skip_all, name = "um.services.user.remove_permission")]
pub async fn remove_permission(
    ctx: &ServiceContext,
    actor: &Principal,
    user_id: Uuid,
    permission_id: Uuid,
) -> Result<UserResponse, UmError> {
    let user = users::get_by_id(&ctx.pool, user_id)
        .await?
        .ok_or_else(user_not_found)?;

    if !users::remove_permission(&ctx.pool, user_id, permission_id).await? {
        return Err(UmError::NotFound("Permission not granted".to_string()));
    }

    let id = user_id.to_string();
    record_audit(
        ctx,
        "REMOVE_USER_PERMISSION",
        USERS,
        &id,
        &actor.subject,
        json!({"permission": permission_id}),
    )
    .await;
    ctx.events
        .publish(
            USER_EVENTS,
            USER_PERMISSIONS_CHANGED,
            json!({"id": id, "removed": permission_id}),
        )
        .await;

    to_response(ctx, user).await
}

/// Active users of a tenant, optionally restricted to confirmed holders of
/// one role. Callers outside the tenant need `ROLE_ADMIN`.
#[instrument(skip_all, name = "um.services.user.list_tenant_users")]
pub async fn list_tenant_users(
    ctx: &ServiceContext,
    principal: &Principal,
    tenant_id: &str,
    role_name: Option<&str>,
) -> Result<Vec<UserResponse>, UmError> {
    let same_tenant = principal.tenant.as_deref() == Some(tenant_id);
    if !same_tenant && !principal.has_role(ROLE_ADMIN) {
        tracing::warn!(target: "um.services.user", "Cross-tenant listing denied");
        return Err(UmError::Forbidden(FORBIDDEN_MESSAGE.to_string()));
    }

    let mut filter = UserFilter {
        tenant_id: Some(tenant_id.to_string()),
        enabled: Some(true),
        limit: MAX_SEARCH_LIMIT,
        ..Default::default()
    };

    if let Some(role_name) = role_name {
        if roles::get_by_name(&ctx.pool, role_name).await?.is_none() {
            return Err(UmError::NotFound(format!("Role '{role_name}' not found")));
        }
        filter.role_name = Some(role_name.to_string());
        filter.confirmed = Some(true);
    }

    let found = users::search(&ctx.pool, &filter).await?;
    let mut responses = Vec::with_capacity(found.len());
    for user in found {
        responses.push(to_response(ctx, user).await?);
    }
    Ok(responses)
}
