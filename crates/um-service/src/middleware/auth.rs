//! Authentication and authorization middleware.
//!
//! - `require_auth` verifies the bearer token and injects the `TokenClaims`
//!   and `Principal` into request extensions.
//! - `require_role` verifies the token and then checks one role, in that
//!   order, before the handler runs.
//!
//! Failures short-circuit with a generic 401 or 403; the specific reason is
//! only logged and counted.

use crate::auth::{AuthError, AuthorizationGate, Principal, RoleRequirement};
use crate::errors::UmError;
use crate::observability::metrics::record_token_validation;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for `require_auth`.
#[derive(Clone)]
pub struct AuthState {
    pub gate: AuthorizationGate,
}

/// State for `require_role`: the gate plus the role a route group needs.
#[derive(Clone)]
pub struct RoleState {
    pub gate: AuthorizationGate,
    pub requirement: RoleRequirement,
}

/// Extract the Bearer token from the Authorization header.
///
/// The scheme is matched case-insensitively. A missing or malformed header is
/// counted here, since the validator never sees it.
fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let result = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "um.middleware.auth", "Missing Authorization header");
            AuthError::MissingToken
        })
        .and_then(|value| match value.split_once(' ') {
            Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => {
                Ok(token.trim_start())
            }
            _ => {
                tracing::debug!(target: "um.middleware.auth", "Invalid Authorization header format");
                Err(AuthError::MalformedToken)
            }
        });

    if let Err(e) = &result {
        record_token_validation("error", e.reason());
    }
    result
}

/// Authentication middleware.
///
/// # Response
///
/// - 401 Unauthorized if the token is missing or fails verification
/// - Otherwise the handler runs with `TokenClaims` and `Principal` in extensions
#[instrument(skip_all, name = "um.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, UmError> {
    let token = extract_bearer_token(req.headers())?;
    let claims = state.gate.validator().verify(token).await?;

    let principal = Principal::from(&claims);
    req.extensions_mut().insert(claims);
    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

/// Role-checking middleware.
///
/// # Response
///
/// - 401 Unauthorized if the token is missing or fails verification
/// - 403 Forbidden if the verified caller lacks the required role
/// - Otherwise the handler runs with `Principal` in extensions
#[instrument(skip_all, name = "um.middleware.require_role")]
pub async fn require_role(
    State(state): State<Arc<RoleState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, UmError> {
    let token = extract_bearer_token(req.headers())?;
    let principal = state.gate.authorize(token, &state.requirement).await?;

    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}
