//! Background tasks for the User Management service.
//!
//! # Tasks
//!
//! - `jwks_refresh` - eager signing key refresh when `JWKS_REFRESH_MODE=background`
//! - `retention_sweep` - hard-deletes users soft-deleted past the retention window
//!
//! Both exit when their cancellation token fires.

pub mod jwks_refresh;
pub mod retention_sweep;

pub use jwks_refresh::start_jwks_refresh;
pub use retention_sweep::start_retention_sweep;
