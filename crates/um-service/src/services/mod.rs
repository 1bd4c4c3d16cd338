//! Service layer.
//!
//! Handlers call into these modules after authentication and authorization
//! have succeeded. Services own validation, password hashing, passcode flows,
//! audit records and domain events; repositories own SQL.

pub mod email;
pub mod events;
pub mod otp;
pub mod permission_service;
pub mod role_service;
pub mod user_service;

use crate::config::Config;
use crate::errors::UmError;
use crate::observability::metrics::record_audit_log_failure;
use crate::repositories::audit_events;
use common::secret::{ExposeSecret, SecretString};
use email::EmailSender;
use events::EventPublisher;
use otp::OtpStore;
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

/// `performed_by` value for actions a user takes on their own account
/// without a token (registration, confirmation, reset).
pub const ACTOR_SELF: &str = "SELF";

/// Minimum password length.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Upper bound accepted for passwords. bcrypt ignores input past 72 bytes.
pub const MAX_PASSWORD_LENGTH: usize = 72;

/// Collaborators shared by the services.
#[derive(Clone)]
pub struct ServiceContext {
    pub pool: PgPool,
    pub otp_store: Arc<dyn OtpStore>,
    pub email: Arc<dyn EmailSender>,
    pub events: Arc<dyn EventPublisher>,
    pub otp_ttl: Duration,
    pub bcrypt_cost: u32,
}

impl ServiceContext {
    pub fn new(
        pool: PgPool,
        config: &Config,
        otp_store: Arc<dyn OtpStore>,
        email: Arc<dyn EmailSender>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            pool,
            otp_store,
            email,
            events,
            otp_ttl: config.otp_ttl,
            bcrypt_cost: config.bcrypt_cost,
        }
    }
}

/// Write an audit event. A failed write is logged and counted, never
/// returned: the change it describes has already been committed.
pub(crate) async fn record_audit(
    ctx: &ServiceContext,
    action: &'static str,
    target_collection: &str,
    target_id: &str,
    performed_by: &str,
    details: Value,
) {
    if let Err(e) = audit_events::log_event(
        &ctx.pool,
        action,
        target_collection,
        target_id,
        performed_by,
        &details,
    )
    .await
    {
        record_audit_log_failure(action);
        tracing::error!(
            target: "um.services.audit",
            action,
            target_collection,
            error = %e,
            "Failed to write audit event"
        );
    }
}

/// Lowercase and trim an email address, rejecting obviously invalid input.
pub(crate) fn normalize_email(email: &str) -> Result<String, UmError> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(email)
    } else {
        Err(UmError::BadRequest("Invalid email address".to_string()))
    }
}

pub(crate) fn validate_password(password: &SecretString) -> Result<(), UmError> {
    let len = password.expose_secret().chars().count();
    if len < MIN_PASSWORD_LENGTH {
        return Err(UmError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    if password.expose_secret().len() > MAX_PASSWORD_LENGTH {
        return Err(UmError::BadRequest(format!(
            "Password must be at most {MAX_PASSWORD_LENGTH} bytes"
        )));
    }
    Ok(())
}

/// Validate and bcrypt-hash a password off the async runtime.
pub(crate) async fn hash_password(password: &SecretString, cost: u32) -> Result<String, UmError> {
    validate_password(password)?;
    let password = password.clone();

    tokio::task::spawn_blocking(move || bcrypt::hash(password.expose_secret(), cost))
        .await
        .map_err(|e| {
            tracing::error!(target: "um.services", error = %e, "Password hashing task failed");
            UmError::Internal
        })?
        .map_err(|e| {
            tracing::error!(target: "um.services", error = %e, "Password hashing failed");
            UmError::Internal
        })
}
