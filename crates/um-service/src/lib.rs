//! User Management (UM) Service Library
//!
//! Multi-tenant user, role and permission management behind a bearer-token
//! gate. Access tokens are issued by an external identity provider and
//! verified here against its published JWKS.
//!
//! # Architecture
//!
//! Handler -> Service -> Repository, with authentication in middleware:
//!
//! ```text
//! routes/mod.rs -> middleware/auth.rs -> handlers/*.rs -> services/*.rs -> repositories/*.rs
//! ```
//!
//! # Modules
//!
//! - `auth` - signing key cache, token validation, replay ledger, role gate
//! - `config` - service configuration from environment
//! - `errors` - error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - authentication and HTTP metrics middleware
//! - `models` - database rows and API payloads
//! - `observability` - Prometheus metrics
//! - `repositories` - Postgres access
//! - `routes` - Axum router setup
//! - `services` - business logic, passcodes, email and domain events
//! - `tasks` - background maintenance loops

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod tasks;
