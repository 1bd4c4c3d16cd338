//! Repository layer for the User Management service.
//!
//! Free async functions over `&PgPool`, following the Handler -> Service ->
//! Repository layering. Queries are runtime-checked `sqlx` queries; every
//! call records `um_db_queries_total` and its latency.

pub mod audit_events;
pub mod permissions;
pub mod roles;
pub mod users;

use crate::errors::UmError;
use crate::observability::metrics::record_db_query;
use sqlx::{PgPool, Postgres, Transaction};
use std::future::Future;
use std::time::Instant;

/// Run a query future and record its outcome under `operation`.
pub(crate) async fn observe<T, F>(operation: &'static str, query: F) -> Result<T, sqlx::Error>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    let start = Instant::now();
    let result = query.await;
    let status = if result.is_ok() { "success" } else { "error" };
    record_db_query(operation, status, start.elapsed());
    result
}

/// Start a transaction for writes that must land together.
pub async fn begin(pool: &PgPool) -> Result<Transaction<'static, Postgres>, UmError> {
    pool.begin()
        .await
        .map_err(|e| UmError::Database(format!("Failed to start transaction: {}", e)))
}

/// Commit `tx`. Dropping a transaction without committing rolls it back.
pub async fn commit(tx: Transaction<'static, Postgres>) -> Result<(), UmError> {
    tx.commit()
        .await
        .map_err(|e| UmError::Database(format!("Failed to commit transaction: {}", e)))
}

/// Map a write error, turning violations of `constraint` into `Conflict`.
pub(crate) fn map_constraint_error(
    err: sqlx::Error,
    constraint: &str,
    conflict_message: &str,
    context: &str,
) -> UmError {
    let violated = err
        .as_database_error()
        .and_then(|db_err| db_err.constraint())
        .is_some_and(|name| name == constraint);

    if violated {
        UmError::Conflict(conflict_message.to_string())
    } else {
        UmError::Database(format!("{context}: {err}"))
    }
}

/// Escape `%`, `_` and `\` so user input matches literally inside ILIKE.
pub(crate) fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
