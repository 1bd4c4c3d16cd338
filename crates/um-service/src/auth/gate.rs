//! Role-based authorization.
//!
//! Roles are compared as exact strings. The gate never checks a role
//! without first verifying the token; `authorize` is the only entry point
//! that starts from a raw token.

use crate::auth::claims::Principal;
use crate::auth::jwt::TokenValidator;
use crate::auth::AuthError;
use crate::observability::metrics::record_authorization;
use std::fmt;
use std::sync::Arc;

/// Role needed to reach a route.
///
/// Only single-role checks exist today. Combinators such as "any of" would
/// be added as new variants without changing callers of `require`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleRequirement {
    Role(String),
}

impl RoleRequirement {
    pub fn role(role: impl Into<String>) -> Self {
        RoleRequirement::Role(role.into())
    }

    pub fn is_satisfied_by(&self, principal: &Principal) -> bool {
        match self {
            RoleRequirement::Role(role) => principal.has_role(role),
        }
    }
}

impl fmt::Display for RoleRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleRequirement::Role(role) => f.write_str(role),
        }
    }
}

impl From<&str> for RoleRequirement {
    fn from(role: &str) -> Self {
        RoleRequirement::role(role)
    }
}

/// Verifies tokens and enforces role requirements.
#[derive(Clone)]
pub struct AuthorizationGate {
    validator: Arc<TokenValidator>,
}

impl AuthorizationGate {
    pub fn new(validator: Arc<TokenValidator>) -> Self {
        Self { validator }
    }

    pub fn validator(&self) -> &Arc<TokenValidator> {
        &self.validator
    }

    /// Verify `token` and return the caller.
    pub async fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
        self.validator.verify(token).await.map(Principal::from)
    }

    /// Check that an already-authenticated principal satisfies `requirement`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Forbidden` when the requirement is not met.
    pub fn require<'p>(
        &self,
        principal: &'p Principal,
        requirement: &RoleRequirement,
    ) -> Result<&'p Principal, AuthError> {
        if requirement.is_satisfied_by(principal) {
            record_authorization("allowed");
            Ok(principal)
        } else {
            tracing::info!(
                target: "um.auth.gate",
                required = %requirement,
                tenant = ?principal.tenant,
                "Authorization denied"
            );
            record_authorization("denied");
            Err(AuthError::Forbidden)
        }
    }

    /// Verify `token`, then require `requirement`.
    pub async fn authorize(
        &self,
        token: &str,
        requirement: &RoleRequirement,
    ) -> Result<Principal, AuthError> {
        let principal = self.authenticate(token).await?;
        self.require(&principal, requirement)?;
        Ok(principal)
    }
}
