//! Current caller handler.

use crate::auth::TokenClaims;
use crate::models::MeResponse;
use axum::{Extension, Json};
use tracing::instrument;

/// Handler for GET /api/v1/me
///
/// Returns the verified claims of the caller's token. Requires `require_auth`.
#[instrument(skip_all, name = "um.handlers.me")]
pub async fn get_me(Extension(claims): Extension<TokenClaims>) -> Json<MeResponse> {
    Json(MeResponse {
        sub: claims.sub,
        tenant: claims.tenant,
        roles: claims.roles,
        exp: claims.exp,
        iat: claims.iat,
    })
}
