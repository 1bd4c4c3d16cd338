//! HTTP request handlers for the User Management service.

pub mod admin;
pub mod health;
pub mod hierarchy;
pub mod me;
pub mod metrics;
pub mod users;

pub use health::{health_check, readiness_check};
pub use me::get_me;
pub use metrics::metrics_handler;
