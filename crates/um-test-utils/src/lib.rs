//! # UM Test Utilities
//!
//! Shared test utilities for the User Management (UM) service.
//!
//! This crate provides:
//! - Fixed RSA signing keys (`TestSigningKey`)
//! - Token claim builders and forgeries (`TestTokenBuilder`, `replace_payload`)
//! - A mock JWKS endpoint on `wiremock` (`mount_jwks`)
//! - Recording email and event collaborators
//! - Server test harness (`TestUmServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use um_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let server = wiremock::MockServer::start().await;
//!     let key = TestSigningKey::primary();
//!     mount_jwks(&server, &[&key]).await;
//!
//!     let token = key.sign(&TestTokenBuilder::new().roles(&["ROLE_ADMIN"]).build());
//!     // present `token` as a Bearer credential
//! }
//! ```

pub mod crypto_fixtures;
pub mod jwks_mock;
pub mod recorders;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use jwks_mock::*;
pub use recorders::*;
pub use server_harness::*;
pub use token_builders::*;
