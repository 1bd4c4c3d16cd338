//! Authentication and authorization failure reasons.
//!
//! Every variant except `Forbidden` is an authentication failure and is
//! surfaced to clients as a generic 401. The variant itself is only logged
//! and used as a bounded metric label.

use common::jwt::JwtValidationError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,

    #[error("malformed token")]
    MalformedToken,

    #[error("unsupported signing algorithm")]
    UnsupportedAlgorithm,

    #[error("unknown signing key")]
    UnknownSigningKey,

    /// No key set has ever been loaded and the JWKS endpoint is unreachable.
    #[error("signing keys unavailable")]
    KeyUnavailable,

    #[error("token expired")]
    TokenExpired,

    #[error("token not yet valid")]
    TokenNotYetValid,

    /// Signature, claim shape, issuer or audience check failed.
    #[error("token invalid")]
    TokenInvalid,

    #[error("token replay detected")]
    ReplayDetected,

    /// Enforced replay protection could not reach the ledger.
    #[error("replay ledger unavailable")]
    ReplayLedgerUnavailable,

    #[error("insufficient privileges")]
    Forbidden,
}

impl AuthError {
    /// True for authorization failures (403), false for authentication failures (401).
    pub fn is_forbidden(&self) -> bool {
        matches!(self, AuthError::Forbidden)
    }

    /// Bounded label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::MalformedToken => "malformed",
            AuthError::UnsupportedAlgorithm => "unsupported_algorithm",
            AuthError::UnknownSigningKey => "unknown_kid",
            AuthError::KeyUnavailable => "key_unavailable",
            AuthError::TokenExpired => "expired",
            AuthError::TokenNotYetValid => "not_yet_valid",
            AuthError::TokenInvalid => "invalid",
            AuthError::ReplayDetected => "replay",
            AuthError::ReplayLedgerUnavailable => "ledger_unavailable",
            AuthError::Forbidden => "forbidden",
        }
    }
}

impl From<JwtValidationError> for AuthError {
    fn from(err: JwtValidationError) -> Self {
        match err {
            JwtValidationError::TokenTooLarge
            | JwtValidationError::MalformedToken
            | JwtValidationError::MissingKid => AuthError::MalformedToken,
            JwtValidationError::UnsupportedAlgorithm => AuthError::UnsupportedAlgorithm,
            JwtValidationError::Expired => AuthError::TokenExpired,
            JwtValidationError::NotYetValid => AuthError::TokenNotYetValid,
        }
    }
}
