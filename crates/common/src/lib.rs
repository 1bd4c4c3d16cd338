//! Common utilities shared across user-management components.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (header parsing, time claims, constants)
pub mod jwt;
