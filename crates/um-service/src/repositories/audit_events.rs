//! Audit trail repository.
//!
//! Entries are append-only. Callers treat a failed write as best-effort:
//! the mutation it describes has already happened.

use super::observe;
use crate::errors::UmError;
use crate::models::AuditEvent;
use sqlx::types::Json;
use sqlx::PgPool;

pub async fn log_event(
    pool: &PgPool,
    action: &str,
    target_collection: &str,
    target_id: &str,
    performed_by: &str,
    details: &serde_json::Value,
) -> Result<(), UmError> {
    observe(
        "insert_audit_event",
        sqlx::query(
            r#"
            INSERT INTO audit_events (action, target_collection, target_id, performed_by, details)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(action)
        .bind(target_collection)
        .bind(target_id)
        .bind(performed_by)
        .bind(Json(details))
        .execute(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to write audit event: {}", e)))?;

    Ok(())
}

/// Events for one target, oldest first.
pub async fn list_for_target(
    pool: &PgPool,
    target_collection: &str,
    target_id: &str,
) -> Result<Vec<AuditEvent>, UmError> {
    observe(
        "list_audit_events",
        sqlx::query_as::<_, AuditEvent>(
            r#"
            SELECT id, action, target_collection, target_id, performed_by, details, created_at
            FROM audit_events
            WHERE target_collection = $1 AND target_id = $2
            ORDER BY created_at, id
            "#,
        )
        .bind(target_collection)
        .bind(target_id)
        .fetch_all(pool),
    )
    .await
    .map_err(|e| UmError::Database(format!("Failed to list audit events: {}", e)))
}
