//! Metrics definitions for the User Management service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `um_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: HTTP methods
//! - `endpoint`: parameterized route templates, unknown paths become `/other`
//! - `status`: success, error, timeout
//! - `reason`: one value per `AuthError` variant
//! - `trigger`: stale, unknown_kid, forced
//! - `operation`: bounded by repository code

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the global Prometheus recorder and return its handle.
///
/// # Errors
///
/// Returns error if the recorder cannot be installed (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("um_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // JWKS fetch is bounded by the fetch timeout (default 5s)
        .set_buckets_for_metric(
            Matcher::Prefix("um_jwks_refresh".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set JWKS refresh buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("um_db_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set DB query buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `um_http_requests_total`, `um_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
///
/// Captures framework-level rejections (415, 400 on bad JSON, 404, 405) as
/// well as handler responses.
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("um_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("um_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

fn normalize_endpoint(path: &str) -> String {
    match path {
        "/"
        | "/health"
        | "/ready"
        | "/metrics"
        | "/api/v1/me"
        | "/user/register"
        | "/user/confirm"
        | "/user/forget"
        | "/user/reset"
        | "/user/password"
        | "/admin/users"
        | "/admin/users/invite"
        | "/admin/users/search"
        | "/admin/roles"
        | "/admin/permissions" => path.to_string(),
        _ => normalize_dynamic_endpoint(path),
    }
}

/// Replace ids and tenant names with placeholders.
fn normalize_dynamic_endpoint(path: &str) -> String {
    let parts: Vec<&str> = path.trim_end_matches('/').split('/').collect();

    match parts.as_slice() {
        ["", "admin", "users", _] => "/admin/users/{id}".to_string(),
        ["", "admin", "users", _, "password"] => "/admin/users/{id}/password".to_string(),
        ["", "admin", "users", _, "permissions"] => "/admin/users/{id}/permissions".to_string(),
        ["", "admin", "users", _, "permissions", _] => {
            "/admin/users/{id}/permissions/{permission_id}".to_string()
        }
        ["", "admin", "roles", _] => "/admin/roles/{id}".to_string(),
        ["", "admin", "roles", _, "permissions"] => "/admin/roles/{id}/permissions".to_string(),
        ["", "admin", "permissions", _] => "/admin/permissions/{id}".to_string(),
        ["", "hierarchy", "tenant", _, "users"] => "/hierarchy/tenant/{tenant_id}/users".to_string(),
        ["", "hierarchy", "tenant", _, "users", _] => {
            "/hierarchy/tenant/{tenant_id}/users/{role_name}".to_string()
        }
        _ => "/other".to_string(),
    }
}

// ============================================================================
// Token Validation Metrics
// ============================================================================

/// Record a token verification outcome.
///
/// Metric: `um_token_validations_total`
/// Labels: `status` (success, error), `reason` (`AuthError::reason()` or "none")
pub fn record_token_validation(status: &str, reason: &str) {
    counter!("um_token_validations_total",
        "status" => status.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a JWKS fetch attempt.
///
/// Metric: `um_jwks_refresh_total`, `um_jwks_refresh_duration_seconds`
/// Labels: `trigger`, `status`
pub fn record_jwks_refresh(trigger: &str, status: &str, duration: Duration) {
    histogram!("um_jwks_refresh_duration_seconds", "trigger" => trigger.to_string())
        .record(duration.as_secs_f64());

    counter!("um_jwks_refresh_total",
        "trigger" => trigger.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Number of keys in the current JWKS snapshot.
///
/// Metric: `um_jwks_keys`
pub fn set_jwks_keys(count: usize) {
    gauge!("um_jwks_keys").set(count as f64);
}

/// Record a replay ledger check.
///
/// Metric: `um_replay_checks_total`
/// Labels: `outcome` (recorded, replay, skipped, ledger_error)
pub fn record_replay_check(outcome: &str) {
    counter!("um_replay_checks_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a role check.
///
/// Metric: `um_authorization_total`
/// Labels: `outcome` (allowed, denied)
pub fn record_authorization(outcome: &str) {
    counter!("um_authorization_total", "outcome" => outcome.to_string()).increment(1);
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Record database query execution
///
/// Metric: `um_db_query_duration_seconds`, `um_db_queries_total`
/// Labels: `operation`, `status`
pub fn record_db_query(operation: &str, status: &str, duration: Duration) {
    histogram!("um_db_query_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("um_db_queries_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record an audit write that failed after the audited change was applied.
///
/// Metric: `um_audit_log_failures_total`
/// Labels: `action`
pub fn record_audit_log_failure(action: &str) {
    counter!("um_audit_log_failures_total", "action" => action.to_string()).increment(1);
}

// ============================================================================
// Background Task Metrics
// ============================================================================

/// Record soft-deleted users purged by the retention sweep.
///
/// Metric: `um_retention_purged_total`
pub fn record_retention_purge(count: u64) {
    counter!("um_retention_purged_total").increment(count);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

    type Counters = Vec<(String, Vec<(String, String)>, u64)>;

    fn counters(snapshotter: &Snapshotter) -> Counters {
        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter_map(|(key, _, _, value)| match value {
                DebugValue::Counter(count) => {
                    let key = key.key();
                    let labels = key
                        .labels()
                        .map(|l| (l.key().to_string(), l.value().to_string()))
                        .collect();
                    Some((key.name().to_string(), labels, count))
                }
                _ => None,
            })
            .collect()
    }

    /// Counter value for `name` whose labels include every pair in `labels`.
    fn counter_value(counters: &Counters, name: &str, labels: &[(&str, &str)]) -> Option<u64> {
        counters.iter().find_map(|(n, l, count)| {
            let matches = n == name
                && labels
                    .iter()
                    .all(|(k, v)| l.iter().any(|(lk, lv)| lk == k && lv == v));
            matches.then_some(*count)
        })
    }

    #[test]
    fn test_categorize_status_code() {
        assert_eq!(categorize_status_code(200), "success");
        assert_eq!(categorize_status_code(201), "success");
        assert_eq!(categorize_status_code(204), "success");
        assert_eq!(categorize_status_code(408), "timeout");
        assert_eq!(categorize_status_code(504), "timeout");
        assert_eq!(categorize_status_code(401), "error");
        assert_eq!(categorize_status_code(403), "error");
        assert_eq!(categorize_status_code(503), "error");
    }

    #[test]
    fn test_normalize_endpoint_known_paths() {
        assert_eq!(normalize_endpoint("/health"), "/health");
        assert_eq!(normalize_endpoint("/api/v1/me"), "/api/v1/me");
        assert_eq!(normalize_endpoint("/user/register"), "/user/register");
        assert_eq!(normalize_endpoint("/admin/roles"), "/admin/roles");
    }

    #[test]
    fn test_normalize_endpoint_dynamic_paths() {
        let id = "550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(
            normalize_endpoint(&format!("/admin/users/{id}")),
            "/admin/users/{id}"
        );
        assert_eq!(
            normalize_endpoint(&format!("/admin/users/{id}/permissions/{id}")),
            "/admin/users/{id}/permissions/{permission_id}"
        );
        assert_eq!(
            normalize_endpoint(&format!("/admin/roles/{id}/permissions")),
            "/admin/roles/{id}/permissions"
        );
        assert_eq!(
            normalize_endpoint("/hierarchy/tenant/acme/users/ROLE_ADMIN"),
            "/hierarchy/tenant/{tenant_id}/users/{role_name}"
        );
        assert_eq!(
            normalize_endpoint("/hierarchy/tenant/acme/users"),
            "/hierarchy/tenant/{tenant_id}/users"
        );
    }

    #[test]
    fn test_normalize_endpoint_unknown_paths() {
        assert_eq!(normalize_endpoint("/wp-admin/login.php"), "/other");
        assert_eq!(normalize_endpoint("/admin/users/a/b/c/d"), "/other");
        assert_eq!(normalize_endpoint(""), "/other");
    }

    #[test]
    fn test_token_validation_counter_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_token_validation("success", "none");
            record_token_validation("error", "expired");
            record_token_validation("error", "expired");
        });

        let counters = counters(&snapshotter);
        assert_eq!(
            counter_value(
                &counters,
                "um_token_validations_total",
                &[("status", "error"), ("reason", "expired")]
            ),
            Some(2)
        );
    }

    #[test]
    fn test_jwks_refresh_and_authorization_recorded() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_jwks_refresh("unknown_kid", "error", Duration::from_millis(20));
            record_authorization("denied");
            record_replay_check("replay");
            set_jwks_keys(2);
            record_db_query("get_user_by_id", "success", Duration::from_millis(3));
            record_http_request("GET", "/admin/users/abc", 403, Duration::from_millis(4));
            record_retention_purge(5);
            record_audit_log_failure("DELETE_USER");
        });

        let counters = counters(&snapshotter);
        assert_eq!(
            counter_value(
                &counters,
                "um_jwks_refresh_total",
                &[("trigger", "unknown_kid"), ("status", "error")]
            ),
            Some(1)
        );
        assert_eq!(
            counter_value(
                &counters,
                "um_authorization_total",
                &[("outcome", "denied")]
            ),
            Some(1)
        );
        assert_eq!(
            counter_value(
                &counters,
                "um_http_requests_total",
                &[("endpoint", "/admin/users/{id}"), ("status_code", "403")]
            ),
            Some(1)
        );
        assert_eq!(
            counter_value(&counters, "um_retention_purged_total", &[]),
            Some(5)
        );
        assert_eq!(
            counter_value(
                &counters,
                "um_audit_log_failures_total",
                &[("action", "DELETE_USER")]
            ),
            Some(1)
        );
    }
}
