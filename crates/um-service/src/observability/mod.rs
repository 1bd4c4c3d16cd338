//! Observability for the User Management service.
//!
//! Provides the Prometheus recorder and the metric recording helpers used
//! by the auth layer, repositories and HTTP middleware.
//!
//! # Privacy
//!
//! Metric labels are bounded enums or normalized paths. Tokens, emails,
//! subjects and tenant identifiers never appear as label values.

pub mod metrics;
