//! HTTP middleware for the User Management service.
//!
//! # Components
//!
//! - `auth` - bearer token verification and role checks for protected routes
//! - `http_metrics` - request metrics for every response

pub mod auth;
pub mod http_metrics;

pub use auth::{require_auth, require_role, AuthState, RoleState};
pub use http_metrics::http_metrics_middleware;
