//! Token validation and authorization.
//!
//! - `jwks` - signing key cache (JWKS fetch, TTL, last-known-good fallback)
//! - `jwt` - bearer token verification
//! - `replay` - single-use token ledger
//! - `gate` - role checks

pub mod claims;
pub mod error;
pub mod gate;
pub mod jwks;
pub mod jwt;
pub mod replay;

pub use claims::{Principal, TokenClaims};
pub use error::AuthError;
pub use gate::{AuthorizationGate, RoleRequirement};
pub use jwks::{KeySetCache, SigningKey};
pub use jwt::TokenValidator;
pub use replay::{InMemoryReplayLedger, RedisReplayLedger, ReplayLedger, ReplayProtection};
