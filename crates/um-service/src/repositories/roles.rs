//! Role repository.

use super::{map_constraint_error, observe};
use crate::errors::UmError;
use crate::models::Role;
use sqlx::PgPool;
use uuid::Uuid;

pub async fn create(
    pool: &PgPool,
    name: &str,
    description: Option<&str>,
    is_default: bool,
) -> Result<Role, UmError> {
    observe(
        "create_role",
        sqlx::query_as::<_, Role>(
            r#"
            INSERT INTO roles (name, description, is_default)
            VALUES ($1, $2, $3)
            RETURNING id, name, description, is_default, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(is_default)
        .fetch_one(pool),
    )
    .await
    .map_err(|e| map_constraint_error(e, "roles_name_unique", "Role already exists", "Failed to create role"))
}

pub async fn get_by_id(pool: &PgPool, role_id: Uuid) -> Result<Option<Role>, UmError> {
    observe(
        "get_role_by_id",
        sqlx::query_as::<_, Role>(
            "SELECT id, name, description, is_default, created_at, updated_at FROM roles WHERE id = $1",
        )
        .bind(role_id)
        .fetch_optional(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to fetch role by id: {}", e)))
}

/// Exact, case-sensitive name lookup.
pub async fn get_by_name(pool: &PgPool, name: &str) -> Result<Option<Role>, UmError> {
    observe(
        "get_role_by_name",
        sqlx::query_as::<_, Role>(
            "SELECT id, name, description, is_default, created_at, updated_at FROM roles WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to fetch role by name: {}", e)))
}

/// Resolve role names to roles. Unknown names are absent from the result.
pub async fn get_by_names(pool: &PgPool, names: &[String]) -> Result<Vec<Role>, UmError> {
    observe(
        "get_roles_by_name",
        sqlx::query_as::<_, Role>(
            r#"
            SELECT id, name, description, is_default, created_at, updated_at
            FROM roles
            WHERE name = ANY($1)
            ORDER BY name
            "#,
        )
        .bind(names)
        .fetch_all(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to fetch roles by name: {}", e)))
}

pub async fn list(pool: &PgPool) -> Result<Vec<Role>, UmError> {
    observe(
        "list_roles",
        sqlx::query_as::<_, Role>(
            "SELECT id, name, description, is_default, created_at, updated_at FROM roles ORDER BY name",
        )
        .fetch_all(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to list roles: {}", e)))
}

/// Roles flagged `is_default`, granted to self-registered users.
pub async fn list_default(pool: &PgPool) -> Result<Vec<Role>, UmError> {
    observe(
        "list_default_roles",
        sqlx::query_as::<_, Role>(
            r#"
            SELECT id, name, description, is_default, created_at, updated_at
            FROM roles
            WHERE is_default
            ORDER BY name
            "#,
        )
        .fetch_all(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to list default roles: {}", e)))
}

pub async fn get_permission_ids(pool: &PgPool, role_id: Uuid) -> Result<Vec<Uuid>, UmError> {
    let rows: Vec<(Uuid,)> = observe(
        "get_role_permissions",
        sqlx::query_as(
            "SELECT permission_id FROM role_permissions WHERE role_id = $1 ORDER BY permission_id",
        )
        .bind(role_id)
        .fetch_all(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to fetch role permissions: {}", e)))?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Grant a permission to a role. Returns `false` if already granted.
pub async fn add_permission(
    pool: &PgPool,
    role_id: Uuid,
    permission_id: Uuid,
) -> Result<bool, UmError> {
    let result = observe(
        "add_role_permission",
        sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id)
            VALUES ($1, $2)
            ON CONFLICT (role_id, permission_id) DO NOTHING
            "#,
        )
        .bind(role_id)
        .bind(permission_id)
        .execute(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to add role permission: {}", e)))?;

    if result.rows_affected() > 0 {
        observe(
            "touch_role",
            sqlx::query("UPDATE roles SET updated_at = NOW() WHERE id = $1")
                .bind(role_id)
                .execute(pool),
        )
        .await
        .map_err(|e| UmError::Database(format!("Failed to update role: {}", e)))?;
    }

    Ok(result.rows_affected() > 0)
}

/// Delete a role. Assigned roles are protected by a foreign key and
/// surface as `Conflict`.
pub async fn delete(pool: &PgPool, role_id: Uuid) -> Result<bool, UmError> {
    let result = observe(
        "delete_role",
        sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(role_id)
            .execute(pool),
    )
    .await
    .map_err(|e| {
        map_constraint_error(
            e,
            "user_roles_role_id_fkey",
            "Role is assigned to users, cannot delete",
            "Failed to delete role",
        )
    })?;

    Ok(result.rows_affected() > 0)
}
