//! User repository.
//!
//! Soft-deleted users keep their row (and their email) until the retention
//! sweep purges them. Lookups by ID skip soft-deleted rows; lookups by email
//! do not, so a deleted address cannot be re-registered while retained.

use super::{escape_like, map_constraint_error, observe};
use crate::errors::UmError;
use crate::models::User;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

/// Maximum page size for searches.
pub const MAX_SEARCH_LIMIT: i64 = 1000;

/// Default page size for searches.
pub const DEFAULT_SEARCH_LIMIT: i64 = 100;

const USER_COLUMNS: &str = r#"
    u.id, u.first_name, u.last_name, u.gender, u.email, u.phone, u.password_hash,
    u.enabled, u.confirmed, u.tenant_id, u.timezone, u.attributes,
    u.created_at, u.updated_at, u.created_by, u.updated_by, u.deleted_at
"#;

/// Insert data for a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub gender: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub confirmed: bool,
    pub tenant_id: String,
    pub timezone: Option<String>,
    pub attributes: serde_json::Value,
    pub created_by: Option<String>,
}

/// Whitelisted profile changes. `None` leaves a column unchanged.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub timezone: Option<String>,
    pub enabled: Option<bool>,
    pub attributes: Option<serde_json::Value>,
}

/// Search filter. Soft-deleted users never match.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    /// Case-insensitive substring of first or last name.
    pub name: Option<String>,
    pub tenant_id: Option<String>,
    pub role_name: Option<String>,
    pub enabled: Option<bool>,
    pub confirmed: Option<bool>,
    pub email: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// Insert a user. Runs on a pool or inside a caller's transaction.
pub async fn create<'e, E>(executor: E, new_user: &NewUser) -> Result<User, UmError>
where
    E: PgExecutor<'e>,
{
    let sql = format!(
        r#"
        INSERT INTO users AS u (
            first_name, last_name, gender, email, phone, password_hash,
            confirmed, tenant_id, timezone, attributes, created_by, updated_by
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
        RETURNING {USER_COLUMNS}
        "#
    );

    let user = observe(
        "create_user",
        sqlx::query_as::<_, User>(&sql)
            .bind(&new_user.first_name)
            .bind(&new_user.last_name)
            .bind(&new_user.gender)
            .bind(&new_user.email)
            .bind(&new_user.phone)
            .bind(&new_user.password_hash)
            .bind(new_user.confirmed)
            .bind(&new_user.tenant_id)
            .bind(&new_user.timezone)
            .bind(Json(&new_user.attributes))
            .bind(&new_user.created_by)
            .fetch_one(executor),
    )
    .await
    .map_err(|e| {
        map_constraint_error(
            e,
            "users_email_unique",
            "Email already exists",
            "Failed to create user",
        )
    })?;

    tracing::info!(
        target: "um.repository.users",
        user_id = %user.id,
        tenant_id = %user.tenant_id,
        "User created"
    );

    Ok(user)
}

/// Get an active (not soft-deleted) user.
pub async fn get_by_id(pool: &PgPool, user_id: Uuid) -> Result<Option<User>, UmError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = $1 AND u.deleted_at IS NULL");

    observe(
        "get_user_by_id",
        sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .fetch_optional(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to fetch user by id: {}", e)))
}

/// Get a user by email, including soft-deleted rows.
pub async fn get_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, UmError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.email = $1");

    observe(
        "get_user_by_email",
        sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to fetch user by email: {}", e)))
}

pub async fn search(pool: &PgPool, filter: &UserFilter) -> Result<Vec<User>, UmError> {
    let sql = format!(
        r#"
        SELECT {USER_COLUMNS}
        FROM users u
        WHERE u.deleted_at IS NULL
          AND ($1::text IS NULL OR u.first_name ILIKE $1 OR u.last_name ILIKE $1)
          AND ($2::text IS NULL OR u.tenant_id = $2)
          AND ($3::text IS NULL OR EXISTS (
                SELECT 1 FROM user_roles ur
                JOIN roles r ON r.id = ur.role_id
                WHERE ur.user_id = u.id AND r.name = $3
          ))
          AND ($4::boolean IS NULL OR u.enabled = $4)
          AND ($5::boolean IS NULL OR u.confirmed = $5)
          AND ($6::text IS NULL OR u.email = $6)
        ORDER BY u.created_at, u.id
        LIMIT $7 OFFSET $8
        "#
    );

    let name_pattern = filter
        .name
        .as_deref()
        .map(|name| format!("%{}%", escape_like(name)));
    let limit = filter.limit.clamp(1, MAX_SEARCH_LIMIT);
    let offset = filter.offset.max(0);

    observe(
        "search_users",
        sqlx::query_as::<_, User>(&sql)
            .bind(name_pattern)
            .bind(&filter.tenant_id)
            .bind(&filter.role_name)
            .bind(filter.enabled)
            .bind(filter.confirmed)
            .bind(&filter.email)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to search users: {}", e)))
}

/// Apply profile changes. Returns `None` if the user does not exist.
pub async fn update(
    pool: &PgPool,
    user_id: Uuid,
    changes: &UserChanges,
    updated_by: &str,
) -> Result<Option<User>, UmError> {
    let sql = format!(
        r#"
        UPDATE users AS u SET
            first_name = COALESCE($2, u.first_name),
            last_name = COALESCE($3, u.last_name),
            gender = COALESCE($4, u.gender),
            phone = COALESCE($5, u.phone),
            timezone = COALESCE($6, u.timezone),
            enabled = COALESCE($7, u.enabled),
            attributes = COALESCE($8, u.attributes),
            updated_by = $9,
            updated_at = NOW()
        WHERE u.id = $1 AND u.deleted_at IS NULL
        RETURNING {USER_COLUMNS}
        "#
    );

    observe(
        "update_user",
        sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .bind(&changes.first_name)
            .bind(&changes.last_name)
            .bind(&changes.gender)
            .bind(&changes.phone)
            .bind(&changes.timezone)
            .bind(changes.enabled)
            .bind(changes.attributes.as_ref().map(Json))
            .bind(updated_by)
            .fetch_optional(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to update user: {}", e)))
}

pub async fn update_password(
    pool: &PgPool,
    user_id: Uuid,
    password_hash: &str,
    updated_by: &str,
) -> Result<bool, UmError> {
    let result = observe(
        "update_user_password",
        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2, updated_by = $3, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(password_hash)
        .bind(updated_by)
        .execute(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to update password: {}", e)))?;

    Ok(result.rows_affected() > 0)
}

/// Mark a user confirmed and set `attributes.status` to "Active".
pub async fn mark_confirmed(pool: &PgPool, user_id: Uuid) -> Result<bool, UmError> {
    let result = observe(
        "confirm_user",
        sqlx::query(
            r#"
            UPDATE users
            SET confirmed = TRUE,
                attributes = attributes || '{"status": "Active"}'::jsonb,
                updated_by = 'SELF',
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .execute(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to confirm user: {}", e)))?;

    Ok(result.rows_affected() > 0)
}

/// Soft delete: disable the user and stamp `deleted_at`.
pub async fn soft_delete(pool: &PgPool, user_id: Uuid, deleted_by: &str) -> Result<bool, UmError> {
    let result = observe(
        "soft_delete_user",
        sqlx::query(
            r#"
            UPDATE users
            SET deleted_at = NOW(),
                enabled = FALSE,
                attributes = attributes || '{"status": "Deleted"}'::jsonb,
                updated_by = $2,
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(deleted_by)
        .execute(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to delete user: {}", e)))?;

    Ok(result.rows_affected() > 0)
}

/// Hard-delete users soft-deleted before `older_than`. Returns the count.
pub async fn purge_soft_deleted(pool: &PgPool, older_than: DateTime<Utc>) -> Result<u64, UmError> {
    let result = observe(
        "purge_soft_deleted_users",
        sqlx::query("DELETE FROM users WHERE deleted_at IS NOT NULL AND deleted_at < $1")
            .bind(older_than)
            .execute(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to purge deleted users: {}", e)))?;

    Ok(result.rows_affected())
}

/// Role names held by a user, sorted.
pub async fn get_role_names(pool: &PgPool, user_id: Uuid) -> Result<Vec<String>, UmError> {
    let rows: Vec<(String,)> = observe(
        "get_user_roles",
        sqlx::query_as(
            r#"
            SELECT r.name
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = $1
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to fetch user roles: {}", e)))?;

    Ok(rows.into_iter().map(|(name,)| name).collect())
}

/// Replace a user's role set.
pub async fn set_roles(pool: &PgPool, user_id: Uuid, role_ids: &[Uuid]) -> Result<(), UmError> {
    let mut tx = super::begin(pool).await?;
    replace_roles(&mut tx, user_id, role_ids).await?;
    super::commit(tx).await
}

/// Replace a user's role set on an open connection, typically a transaction.
pub async fn replace_roles(
    conn: &mut PgConnection,
    user_id: Uuid,
    role_ids: &[Uuid],
) -> Result<(), UmError> {
    observe(
        "clear_user_roles",
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *conn),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to clear user roles: {}", e)))?;

    if !role_ids.is_empty() {
        observe(
            "insert_user_roles",
            sqlx::query(
                r#"
                INSERT INTO user_roles (user_id, role_id)
                SELECT $1, role_id FROM UNNEST($2::uuid[]) AS t(role_id)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(user_id)
            .bind(role_ids)
            .execute(&mut *conn),
        )
        .await
        .map_err(|e| UmError::Database(format!("Failed to assign user roles: {}", e)))?;
    }

    Ok(())
}

/// Number of users (deleted or not) holding a role.
pub async fn count_with_role(pool: &PgPool, role_id: Uuid) -> Result<i64, UmError> {
    let (count,): (i64,) = observe(
        "count_users_with_role",
        sqlx::query_as("SELECT COUNT(*) FROM user_roles WHERE role_id = $1")
            .bind(role_id)
            .fetch_one(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to count users with role: {}", e)))?;

    Ok(count)
}

/// Directly granted permission IDs.
pub async fn get_permission_ids(pool: &PgPool, user_id: Uuid) -> Result<Vec<Uuid>, UmError> {
    let rows: Vec<(Uuid,)> = observe(
        "get_user_permissions",
        sqlx::query_as(
            "SELECT permission_id FROM user_permissions WHERE user_id = $1 ORDER BY permission_id",
        )
        .bind(user_id)
        .fetch_all(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to fetch user permissions: {}", e)))?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Grant a permission. Returns `false` if it was already granted.
pub async fn add_permission(
    pool: &PgPool,
    user_id: Uuid,
    permission_id: Uuid,
) -> Result<bool, UmError> {
    let result = observe(
        "add_user_permission",
        sqlx::query(
            r#"
            INSERT INTO user_permissions (user_id, permission_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, permission_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(permission_id)
        .execute(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to add user permission: {}", e)))?;

    Ok(result.rows_affected() > 0)
}

/// Revoke a permission. Returns `false` if it was not granted.
pub async fn remove_permission(
    pool: &PgPool,
    user_id: Uuid,
    permission_id: Uuid,
) -> Result<bool, UmError> {
    let result = observe(
        "remove_user_permission",
        sqlx::query("DELETE FROM user_permissions WHERE user_id = $1 AND permission_id = $2")
            .bind(user_id)
            .bind(permission_id)
            .execute(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to remove user permission: {}", e)))?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::repositories::roles;

    fn new_user(email: &str, tenant: &str) -> NewUser {
        NewUser {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            gender: None,
            email: email.to_string(),
            phone: None,
            password_hash: "$2b$04$notarealhashnotarealhashnotarealhashnotarealhas".to_string(),
            confirmed: true,
            tenant_id: tenant.to_string(),
            timezone: None,
            attributes: serde_json::json!({}),
            created_by: Some("test".to_string()),
        }
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_create_and_fetch(pool: PgPool) -> Result<(), UmError> {
        let created = create(&pool, &new_user("ada@example.com", "acme")).await?;

        let by_id = get_by_id(&pool, created.id).await?.expect("user by id");
        assert_eq!(by_id.email, "ada@example.com");
        assert_eq!(by_id.created_by.as_deref(), Some("test"));

        let by_email = get_by_email(&pool, "ada@example.com")
            .await?
            .expect("user by email");
        assert_eq!(by_email.id, created.id);
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_duplicate_email_is_conflict(pool: PgPool) -> Result<(), UmError> {
        create(&pool, &new_user("dup@example.com", "acme")).await?;
        let err = create(&pool, &new_user("dup@example.com", "other"))
            .await
            .unwrap_err();
        assert!(matches!(err, UmError::Conflict(_)));
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_soft_delete_hides_user(pool: PgPool) -> Result<(), UmError> {
        let user = create(&pool, &new_user("gone@example.com", "acme")).await?;

        assert!(soft_delete(&pool, user.id, "admin").await?);
        assert!(!soft_delete(&pool, user.id, "admin").await?);
        assert!(get_by_id(&pool, user.id).await?.is_none());

        // Row is retained with its email until purged
        let retained = get_by_email(&pool, "gone@example.com").await?.unwrap();
        assert!(retained.is_deleted());
        assert!(!retained.enabled);
        assert_eq!(retained.attributes.0["status"], "Deleted");

        let filter = UserFilter {
            tenant_id: Some("acme".to_string()),
            limit: DEFAULT_SEARCH_LIMIT,
            ..Default::default()
        };
        assert!(search(&pool, &filter).await?.is_empty());
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_purge_only_old_soft_deletes(pool: PgPool) -> Result<(), UmError> {
        let user = create(&pool, &new_user("old@example.com", "acme")).await?;
        let kept = create(&pool, &new_user("kept@example.com", "acme")).await?;
        soft_delete(&pool, user.id, "admin").await?;

        // Nothing is older than an hour ago
        assert_eq!(
            purge_soft_deleted(&pool, Utc::now() - chrono::Duration::hours(1)).await?,
            0
        );
        assert_eq!(
            purge_soft_deleted(&pool, Utc::now() + chrono::Duration::seconds(1)).await?,
            1
        );
        assert!(get_by_email(&pool, "old@example.com").await?.is_none());
        assert!(get_by_id(&pool, kept.id).await?.is_some());
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_search_filters(pool: PgPool) -> Result<(), UmError> {
        let admin_role = roles::get_by_name(&pool, "ROLE_ADMIN").await?.unwrap();

        let ada = create(&pool, &new_user("ada@acme.com", "acme")).await?;
        let mut grace = new_user("grace@acme.com", "acme");
        grace.first_name = "Grace".to_string();
        grace.last_name = "Hopper".to_string();
        grace.confirmed = false;
        create(&pool, &grace).await?;
        create(&pool, &new_user("ada@globex.com", "globex")).await?;

        set_roles(&pool, ada.id, &[admin_role.id]).await?;

        let base = UserFilter {
            limit: DEFAULT_SEARCH_LIMIT,
            ..Default::default()
        };

        let acme = search(
            &pool,
            &UserFilter {
                tenant_id: Some("acme".to_string()),
                ..base.clone()
            },
        )
        .await?;
        assert_eq!(acme.len(), 2);

        let by_name = search(
            &pool,
            &UserFilter {
                name: Some("hop".to_string()),
                ..base.clone()
            },
        )
        .await?;
        assert_eq!(by_name.len(), 1);

        let admins = search(
            &pool,
            &UserFilter {
                tenant_id: Some("acme".to_string()),
                role_name: Some("ROLE_ADMIN".to_string()),
                ..base.clone()
            },
        )
        .await?;
        assert_eq!(admins.len(), 1);
        assert_eq!(admins.first().unwrap().id, ada.id);

        let unconfirmed = search(
            &pool,
            &UserFilter {
                confirmed: Some(false),
                ..base.clone()
            },
        )
        .await?;
        assert_eq!(unconfirmed.len(), 1);

        // Wildcards in the name are literal
        let wildcard = search(
            &pool,
            &UserFilter {
                name: Some("%".to_string()),
                ..base
            },
        )
        .await?;
        assert!(wildcard.is_empty());
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_update_changes_only_given_fields(pool: PgPool) -> Result<(), UmError> {
        let user = create(&pool, &new_user("upd@example.com", "acme")).await?;

        let changes = UserChanges {
            phone: Some("+44 20 7946 0000".to_string()),
            enabled: Some(false),
            ..Default::default()
        };
        let updated = update(&pool, user.id, &changes, "admin").await?.unwrap();

        assert_eq!(updated.phone.as_deref(), Some("+44 20 7946 0000"));
        assert!(!updated.enabled);
        assert_eq!(updated.first_name, "Ada");
        assert_eq!(updated.updated_by.as_deref(), Some("admin"));

        assert!(update(&pool, Uuid::new_v4(), &changes, "admin").await?.is_none());
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_role_and_permission_links(pool: PgPool) -> Result<(), UmError> {
        let user = create(&pool, &new_user("links@example.com", "acme")).await?;
        let admin = roles::get_by_name(&pool, "ROLE_ADMIN").await?.unwrap();
        let reviewer = roles::get_by_name(&pool, "ROLE_REVIEWER").await?.unwrap();

        set_roles(&pool, user.id, &[admin.id, reviewer.id]).await?;
        assert_eq!(
            get_role_names(&pool, user.id).await?,
            vec!["ROLE_ADMIN", "ROLE_REVIEWER"]
        );
        assert_eq!(count_with_role(&pool, admin.id).await?, 1);

        set_roles(&pool, user.id, &[reviewer.id]).await?;
        assert_eq!(get_role_names(&pool, user.id).await?, vec!["ROLE_REVIEWER"]);
        assert_eq!(count_with_role(&pool, admin.id).await?, 0);

        let permission =
            crate::repositories::permissions::create(&pool, "users.read", None).await?;
        assert!(add_permission(&pool, user.id, permission.id).await?);
        assert!(!add_permission(&pool, user.id, permission.id).await?);
        assert_eq!(get_permission_ids(&pool, user.id).await?, vec![permission.id]);
        assert!(remove_permission(&pool, user.id, permission.id).await?);
        assert!(!remove_permission(&pool, user.id, permission.id).await?);
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_mark_confirmed_sets_status(pool: PgPool) -> Result<(), UmError> {
        let mut pending = new_user("pending@example.com", "acme");
        pending.confirmed = false;
        let user = create(&pool, &pending).await?;

        assert!(mark_confirmed(&pool, user.id).await?);
        let confirmed = get_by_id(&pool, user.id).await?.unwrap();
        assert!(confirmed.confirmed);
        assert_eq!(confirmed.attributes.0["status"], "Active");
        Ok(())
    }
}
