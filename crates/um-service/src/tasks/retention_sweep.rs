//! Soft-delete retention sweep.
//!
//! Soft-deleted users stay in the table (their email stays reserved) until
//! the retention window passes, then this task removes them for good.

use crate::observability::metrics::record_retention_purge;
use crate::repositories::users;
use chrono::Utc;
use sqlx::PgPool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Run the sweep loop until `cancel_token` fires.
pub async fn start_retention_sweep(
    pool: PgPool,
    retention_days: u32,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "um.task.retention_sweep",
        retention_days,
        interval_seconds = interval.as_secs(),
        "Starting retention sweep task"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match sweep_once(&pool, retention_days).await {
                    Ok(0) => {}
                    Ok(count) => {
                        info!(target: "um.task.retention_sweep", purged = count, "Purged soft-deleted users");
                    }
                    Err(e) => {
                        warn!(target: "um.task.retention_sweep", error = %e, "Retention sweep failed");
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!(target: "um.task.retention_sweep", "Retention sweep task received shutdown signal, exiting");
                break;
            }
        }
    }
}

/// Purge users soft-deleted more than `retention_days` ago.
pub async fn sweep_once(pool: &PgPool, retention_days: u32) -> Result<u64, crate::errors::UmError> {
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
    let purged = users::purge_soft_deleted(pool, cutoff).await?;
    record_retention_purge(purged);
    Ok(purged)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::errors::UmError;

    async fn insert_user(pool: &PgPool, email: &str) -> uuid::Uuid {
        let (id,): (uuid::Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO users (first_name, last_name, email, password_hash, tenant_id)
            VALUES ('Ada', 'Lovelace', $1, 'x', 'default')
            RETURNING id
            "#,
        )
        .bind(email)
        .fetch_one(pool)
        .await
        .unwrap();
        id
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_sweep_purges_only_expired_soft_deletes(pool: PgPool) -> Result<(), UmError> {
        let old = insert_user(&pool, "old@example.com").await;
        let recent = insert_user(&pool, "recent@example.com").await;
        let live = insert_user(&pool, "live@example.com").await;

        sqlx::query("UPDATE users SET deleted_at = NOW() - INTERVAL '100 days' WHERE id = $1")
            .bind(old)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("UPDATE users SET deleted_at = NOW() - INTERVAL '1 day' WHERE id = $1")
            .bind(recent)
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(sweep_once(&pool, 90).await?, 1);

        let (remaining,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, 2);
        let (live_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE id = $1")
            .bind(live)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(live_count, 1);
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_sweep_task_stops_on_cancel(pool: PgPool) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(start_retention_sweep(
            pool,
            90,
            Duration::from_secs(3600),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("task should exit after cancellation")
            .unwrap();
    }
}
