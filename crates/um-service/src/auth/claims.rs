//! Validated token claims and the per-request principal.
//!
//! The `sub` field is redacted in Debug output to keep user identifiers out
//! of logs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Claims of a verified access token.
///
/// Only produced by `TokenValidator::verify`; never persisted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (user ID) - redacted in Debug output.
    pub sub: String,

    /// Tenant the subject belongs to. Identity providers emit either spelling.
    #[serde(default, alias = "tenantId", alias = "tenant_id")]
    pub tenant: Option<String>,

    #[serde(default)]
    pub roles: Vec<String>,

    /// Expiration timestamp (Unix epoch seconds). Required.
    pub exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Token ID used for replay protection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl fmt::Debug for TokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenClaims")
            .field("sub", &"[REDACTED]")
            .field("tenant", &self.tenant)
            .field("roles", &self.roles)
            .field("exp", &self.exp)
            .field("nbf", &self.nbf)
            .field("iat", &self.iat)
            .field("jti", &self.jti)
            .finish()
    }
}

/// Authenticated caller, reconstructed from claims on every request.
#[derive(Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub tenant: Option<String>,
    pub roles: Vec<String>,
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("subject", &"[REDACTED]")
            .field("tenant", &self.tenant)
            .field("roles", &self.roles)
            .finish()
    }
}

impl Principal {
    /// Exact, case-sensitive role membership.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

impl From<TokenClaims> for Principal {
    fn from(claims: TokenClaims) -> Self {
        Self {
            subject: claims.sub,
            tenant: claims.tenant,
            roles: claims.roles,
        }
    }
}

impl From<&TokenClaims> for Principal {
    fn from(claims: &TokenClaims) -> Self {
        Self {
            subject: claims.sub.clone(),
            tenant: claims.tenant.clone(),
            roles: claims.roles.clone(),
        }
    }
}
