//! JWT primitives shared by services that accept bearer tokens.
//!
//! Everything here runs before or around signature verification:
//! - Size limits checked before any decoding
//! - Unverified header parsing (`alg`, `kid`) for key lookup
//! - The signing-algorithm allow-list
//! - Time-claim (`exp`, `nbf`) validation with symmetric clock skew
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only algorithms in [`ALLOWED_ALGORITHMS`] are accepted, and the header is
//!   checked against it before a key is ever resolved
//! - Error messages are generic; detail goes to debug logs only
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{extract_header, validate_time_claims_at, DEFAULT_CLOCK_SKEW};
//!
//! let header = extract_header(token)?;
//! let key = key_cache.get_key(&header.kid).await?;
//! // ... verify signature with `key` ...
//! validate_time_claims_at(claims.exp, claims.nbf, DEFAULT_CLOCK_SKEW, now)?;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Typical access tokens are well under 2KB even with a long role list.
/// Anything larger is rejected before base64 decoding or signature work.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default clock skew tolerance applied to `exp` and `nbf` (60 seconds).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Upper bound for configured clock skew (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

/// Signing algorithms accepted in the JWT header.
pub const ALLOWED_ALGORITHMS: &[&str] = &["RS256"];

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised by the pre- and post-verification checks in this module.
///
/// All variants render the same generic message; callers log the variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds [`MAX_JWT_SIZE_BYTES`].
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Not a three-part JWT, or the header is not base64url JSON.
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Header has no `kid`, or it is empty or not a string.
    #[error("The access token is invalid or expired")]
    MissingKid,

    /// Header `alg` is absent or not in [`ALLOWED_ALGORITHMS`].
    #[error("The access token is invalid or expired")]
    UnsupportedAlgorithm,

    /// `exp` is earlier than `now - skew`.
    #[error("The access token is invalid or expired")]
    Expired,

    /// `nbf` is later than `now + skew`.
    #[error("The access token is invalid or expired")]
    NotYetValid,
}

// =============================================================================
// Header
// =============================================================================

/// The parts of an unverified JWT header used for key lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    pub alg: String,
    pub kid: String,
}

#[derive(Deserialize)]
struct RawHeader {
    alg: Option<serde_json::Value>,
    kid: Option<serde_json::Value>,
}

/// Parse the JWT header without verifying the signature.
///
/// Enforces the size limit, the three-part structure, a non-empty string `kid`,
/// and membership of `alg` in [`ALLOWED_ALGORITHMS`]. The returned values must
/// only be used to select a key from a trusted key set.
///
/// # Errors
///
/// - `TokenTooLarge` - token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `MalformedToken` - wrong structure, bad base64 or invalid JSON
/// - `UnsupportedAlgorithm` - `alg` missing or not allowed
/// - `MissingKid` - `kid` missing, empty or not a string
pub fn extract_header(token: &str) -> Result<TokenHeader, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        tracing::debug!(
            target: "common.jwt",
            parts = parts.len(),
            "Token rejected: invalid JWT format"
        );
        return Err(JwtValidationError::MalformedToken);
    }

    let header_part = parts.first().ok_or(JwtValidationError::MalformedToken)?;
    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtValidationError::MalformedToken
    })?;

    let raw: RawHeader = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })?;

    // Algorithm first: a forged header must not be able to steer key lookup.
    let alg = raw
        .alg
        .as_ref()
        .and_then(|v| v.as_str())
        .ok_or(JwtValidationError::UnsupportedAlgorithm)?;
    if !is_allowed_algorithm(alg) {
        tracing::debug!(
            target: "common.jwt",
            alg = %alg,
            "Token rejected: algorithm not in allow-list"
        );
        return Err(JwtValidationError::UnsupportedAlgorithm);
    }

    let kid = raw
        .kid
        .as_ref()
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or(JwtValidationError::MissingKid)?;

    Ok(TokenHeader {
        alg: alg.to_string(),
        kid: kid.to_string(),
    })
}

/// Returns true if `alg` is an accepted signing algorithm.
#[must_use]
pub fn is_allowed_algorithm(alg: &str) -> bool {
    ALLOWED_ALGORITHMS.contains(&alg)
}

// =============================================================================
// Time claims
// =============================================================================

/// Validate `exp` and optional `nbf` against an explicit `now` (Unix seconds).
///
/// Both bounds are inclusive: a token with `exp == now - skew` or
/// `nbf == now + skew` is accepted.
///
/// # Errors
///
/// - `Expired` if `exp < now - skew`
/// - `NotYetValid` if `nbf > now + skew`
pub fn validate_time_claims_at(
    exp: i64,
    nbf: Option<i64>,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // Safe cast: skew is bounded by MAX_CLOCK_SKEW at config time
    #[allow(clippy::cast_possible_wrap)]
    let skew = clock_skew.as_secs() as i64;

    if exp < now.saturating_sub(skew) {
        tracing::debug!(
            target: "common.jwt",
            exp = exp,
            now = now,
            clock_skew_secs = skew,
            "Token rejected: expired"
        );
        return Err(JwtValidationError::Expired);
    }

    if let Some(nbf) = nbf {
        if nbf > now.saturating_add(skew) {
            tracing::debug!(
                target: "common.jwt",
                nbf = nbf,
                now = now,
                clock_skew_secs = skew,
                "Token rejected: not yet valid"
            );
            return Err(JwtValidationError::NotYetValid);
        }
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
