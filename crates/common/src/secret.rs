//! Redacting wrappers for credentials and passcodes.
//!
//! Passwords, one-time passcodes and connection URLs that embed credentials
//! travel through the service as [`SecretString`]. Its `Debug` output is
//! redacted, so request and config structs can derive `Debug` and be traced
//! freely. Reading the value takes an explicit `expose_secret()`.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Confirm {
//!     email: String,
//!     otp: SecretString,
//! }
//!
//! let req: Confirm = serde_json::from_str(r#"{"email":"a@b.c","otp":"042917"}"#).unwrap();
//! assert!(!format!("{req:?}").contains("042917"));
//! assert_eq!(req.otp.expose_secret(), "042917");
//! ```

pub use secrecy::{ExposeSecret, SecretString};
