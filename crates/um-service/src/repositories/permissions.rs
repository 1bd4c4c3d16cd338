//! Permission repository.

use super::{map_constraint_error, observe};
use crate::errors::UmError;
use crate::models::Permission;
use sqlx::PgPool;
use uuid::Uuid;

pub async fn create(
    pool: &PgPool,
    name: &str,
    description: Option<&str>,
) -> Result<Permission, UmError> {
    observe(
        "create_permission",
        sqlx::query_as::<_, Permission>(
            r#"
            INSERT INTO permissions (name, description)
            VALUES ($1, $2)
            RETURNING id, name, description, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(description)
        .fetch_one(pool),
    )
    .await
    .map_err(|e| {
        map_constraint_error(
            e,
            "permissions_name_unique",
            "Permission already exists",
            "Failed to create permission",
        )
    })
}

pub async fn get_by_id(pool: &PgPool, permission_id: Uuid) -> Result<Option<Permission>, UmError> {
    observe(
        "get_permission_by_id",
        sqlx::query_as::<_, Permission>(
            "SELECT id, name, description, created_at, updated_at FROM permissions WHERE id = $1",
        )
        .bind(permission_id)
        .fetch_optional(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to fetch permission: {}", e)))
}

pub async fn list(pool: &PgPool) -> Result<Vec<Permission>, UmError> {
    observe(
        "list_permissions",
        sqlx::query_as::<_, Permission>(
            "SELECT id, name, description, created_at, updated_at FROM permissions ORDER BY name",
        )
        .fetch_all(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to list permissions: {}", e)))
}

/// Delete a permission. Grants to roles and users cascade.
pub async fn delete(pool: &PgPool, permission_id: Uuid) -> Result<bool, UmError> {
    let result = observe(
        "delete_permission",
        sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(permission_id)
            .execute(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to delete permission: {}", e)))?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::repositories::roles;

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_create_list_delete(pool: PgPool) -> Result<(), UmError> {
        let created = create(&pool, "users.write", Some("Edit users")).await?;
        assert_eq!(created.description.as_deref(), Some("Edit users"));

        let all = list(&pool).await?;
        assert_eq!(all.len(), 1);
        assert!(get_by_id(&pool, created.id).await?.is_some());

        assert!(delete(&pool, created.id).await?);
        assert!(get_by_id(&pool, created.id).await?.is_none());
        assert!(!delete(&pool, created.id).await?);
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_duplicate_name_is_conflict(pool: PgPool) -> Result<(), UmError> {
        create(&pool, "users.read", None).await?;
        let err = create(&pool, "users.read", None).await.unwrap_err();
        assert!(matches!(err, UmError::Conflict(_)));
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_delete_cascades_role_grants(pool: PgPool) -> Result<(), UmError> {
        let permission = create(&pool, "tasks.annotate", None).await?;
        let role = roles::get_by_name(&pool, "ROLE_ANNOTATOR").await?.unwrap();
        roles::add_permission(&pool, role.id, permission.id).await?;

        delete(&pool, permission.id).await?;
        assert!(roles::get_permission_ids(&pool, role.id).await?.is_empty());
        Ok(())
    }
}
