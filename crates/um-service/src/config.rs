//! User Management Service configuration.
//!
//! Configuration is loaded from environment variables. Connection URLs are
//! held as secrets and redacted in Debug output.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:5403";

/// Default JWKS endpoint of the identity provider.
pub const DEFAULT_JWKS_URL: &str = "http://localhost:5055/oauth2/jwks";

/// Default key-set cache TTL in seconds.
pub const DEFAULT_JWKS_CACHE_TTL_SECONDS: u64 = 300;

/// Default JWKS fetch timeout in seconds.
pub const DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS: u64 = 5;

/// Upper bound for the JWKS fetch timeout.
pub const MAX_JWKS_FETCH_TIMEOUT_SECONDS: u64 = 30;

/// Default minimum spacing between unknown-kid refreshes, in seconds.
pub const DEFAULT_JWKS_MIN_REFRESH_INTERVAL_SECONDS: u64 = 10;

/// Default replay ledger call timeout in milliseconds.
pub const DEFAULT_REPLAY_LEDGER_TIMEOUT_MS: u64 = 2000;

/// Default OTP lifetime in seconds.
pub const DEFAULT_OTP_TTL_SECONDS: u64 = 300;

/// Default bcrypt cost factor.
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// Default soft-delete retention in days.
pub const DEFAULT_SOFT_DELETE_RETENTION_DAYS: u32 = 90;

/// Default retention sweep interval in seconds.
pub const DEFAULT_RETENTION_SWEEP_INTERVAL_SECONDS: u64 = 3600;

/// How the signing key set is kept fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwksRefreshMode {
    /// Refresh on the lookup that finds the cache older than its TTL.
    Lazy,
    /// Additionally refresh on a fixed interval from a background task.
    Background,
}

impl FromStr for JwksRefreshMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lazy" => Ok(Self::Lazy),
            "background" => Ok(Self::Background),
            other => Err(ConfigError::InvalidValue {
                var: "JWKS_REFRESH_MODE",
                reason: format!("expected 'lazy' or 'background', got '{other}'"),
            }),
        }
    }
}

/// Replay protection policy for tokens carrying a `jti`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayProtection {
    /// No ledger lookups.
    Disabled,
    /// Replays are rejected; ledger outages are logged and the token is accepted.
    Advisory,
    /// Replays are rejected; ledger outages reject the token.
    Enforced,
}

impl FromStr for ReplayProtection {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" | "off" => Ok(Self::Disabled),
            "advisory" => Ok(Self::Advisory),
            "enforced" => Ok(Self::Enforced),
            other => Err(ConfigError::InvalidValue {
                var: "REPLAY_PROTECTION",
                reason: format!("expected 'disabled', 'advisory' or 'enforced', got '{other}'"),
            }),
        }
    }
}

/// User Management Service configuration.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: SecretString,

    /// Redis connection URL (replay ledger, OTP store, event streams).
    pub redis_url: SecretString,

    /// Server bind address (default: "0.0.0.0:5403").
    pub bind_address: String,

    pub service_name: String,

    pub environment: String,

    /// URL of the identity provider's JWKS endpoint.
    pub jwks_url: String,

    pub jwks_cache_ttl: Duration,

    pub jwks_fetch_timeout: Duration,

    /// Minimum spacing between refreshes triggered by an unknown `kid`.
    pub jwks_min_refresh_interval: Duration,

    pub jwks_refresh_mode: JwksRefreshMode,

    /// Symmetric clock skew applied to `exp` and `nbf`.
    pub jwt_clock_skew: Duration,

    /// Expected `iss`, enforced only when set.
    pub jwt_issuer: Option<String>,

    /// Expected `aud`, enforced only when set.
    pub jwt_audience: Option<String>,

    pub replay_protection: ReplayProtection,

    pub replay_ledger_timeout: Duration,

    pub otp_ttl: Duration,

    pub bcrypt_cost: u32,

    pub soft_delete_retention_days: u32,

    pub retention_sweep_interval: Duration,

    /// Allowed CORS origins. Empty means no cross-origin access.
    pub cors_origins: Vec<String>,
}

/// Custom Debug implementation that redacts connection URLs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("redis_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("service_name", &self.service_name)
            .field("environment", &self.environment)
            .field("jwks_url", &self.jwks_url)
            .field("jwks_cache_ttl", &self.jwks_cache_ttl)
            .field("jwks_fetch_timeout", &self.jwks_fetch_timeout)
            .field("jwks_min_refresh_interval", &self.jwks_min_refresh_interval)
            .field("jwks_refresh_mode", &self.jwks_refresh_mode)
            .field("jwt_clock_skew", &self.jwt_clock_skew)
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_audience", &self.jwt_audience)
            .field("replay_protection", &self.replay_protection)
            .field("replay_ledger_timeout", &self.replay_ledger_timeout)
            .field("otp_ttl", &self.otp_ttl)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field("soft_delete_retention_days", &self.soft_delete_retention_days)
            .field("retention_sweep_interval", &self.retention_sweep_interval)
            .field("cors_origins", &self.cors_origins)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars
            .get("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

        let redis_url = vars
            .get("REDIS_URL")
            .cloned()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        let bind_address = string_or(vars, "BIND_ADDRESS", DEFAULT_BIND_ADDRESS);
        let service_name = string_or(vars, "SERVICE_NAME", "user-management-service");
        let environment = string_or(vars, "ENVIRONMENT", "development");

        let jwks_url = string_or(vars, "JWKS_URL", DEFAULT_JWKS_URL);
        if jwks_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                var: "JWKS_URL",
                reason: "must not be empty".to_string(),
            });
        }

        let jwks_cache_ttl_secs =
            parse_u64(vars, "JWKS_CACHE_TTL_SECONDS", DEFAULT_JWKS_CACHE_TTL_SECONDS)?;
        if jwks_cache_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                var: "JWKS_CACHE_TTL_SECONDS",
                reason: "must be positive".to_string(),
            });
        }

        let jwks_fetch_timeout_secs = parse_u64(
            vars,
            "JWKS_FETCH_TIMEOUT_SECONDS",
            DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS,
        )?;
        if jwks_fetch_timeout_secs == 0 || jwks_fetch_timeout_secs > MAX_JWKS_FETCH_TIMEOUT_SECONDS
        {
            return Err(ConfigError::InvalidValue {
                var: "JWKS_FETCH_TIMEOUT_SECONDS",
                reason: format!(
                    "must be between 1 and {MAX_JWKS_FETCH_TIMEOUT_SECONDS}, got {jwks_fetch_timeout_secs}"
                ),
            });
        }

        let jwks_min_refresh_secs = parse_u64(
            vars,
            "JWKS_MIN_REFRESH_INTERVAL_SECONDS",
            DEFAULT_JWKS_MIN_REFRESH_INTERVAL_SECONDS,
        )?;

        let jwks_refresh_mode = match vars.get("JWKS_REFRESH_MODE") {
            Some(v) => v.parse()?,
            None => JwksRefreshMode::Lazy,
        };

        let jwt_clock_skew = parse_clock_skew(vars)?;

        let jwt_issuer = non_empty(vars, "JWT_ISSUER");
        let jwt_audience = non_empty(vars, "JWT_AUDIENCE");

        let replay_protection = match vars.get("REPLAY_PROTECTION") {
            Some(v) => v.parse()?,
            None => ReplayProtection::Disabled,
        };

        let replay_ledger_timeout_ms = parse_u64(
            vars,
            "REPLAY_LEDGER_TIMEOUT_MS",
            DEFAULT_REPLAY_LEDGER_TIMEOUT_MS,
        )?;
        if replay_ledger_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                var: "REPLAY_LEDGER_TIMEOUT_MS",
                reason: "must be positive".to_string(),
            });
        }

        let otp_ttl_secs = parse_u64(vars, "OTP_TTL_SECONDS", DEFAULT_OTP_TTL_SECONDS)?;
        if otp_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                var: "OTP_TTL_SECONDS",
                reason: "must be positive".to_string(),
            });
        }

        let bcrypt_cost = parse_u64(vars, "BCRYPT_COST", u64::from(DEFAULT_BCRYPT_COST))?;
        let bcrypt_cost = u32::try_from(bcrypt_cost)
            .ok()
            .filter(|c| (4..=31).contains(c))
            .ok_or_else(|| ConfigError::InvalidValue {
                var: "BCRYPT_COST",
                reason: format!("must be between 4 and 31, got {bcrypt_cost}"),
            })?;

        let retention_days = parse_u64(
            vars,
            "SOFT_DELETE_RETENTION_DAYS",
            u64::from(DEFAULT_SOFT_DELETE_RETENTION_DAYS),
        )?;
        let soft_delete_retention_days = u32::try_from(retention_days)
            .ok()
            .filter(|d| *d > 0)
            .ok_or_else(|| ConfigError::InvalidValue {
                var: "SOFT_DELETE_RETENTION_DAYS",
                reason: format!("must be a positive number of days, got {retention_days}"),
            })?;

        let sweep_secs = parse_u64(
            vars,
            "RETENTION_SWEEP_INTERVAL_SECONDS",
            DEFAULT_RETENTION_SWEEP_INTERVAL_SECONDS,
        )?;
        if sweep_secs == 0 {
            return Err(ConfigError::InvalidValue {
                var: "RETENTION_SWEEP_INTERVAL_SECONDS",
                reason: "must be positive".to_string(),
            });
        }

        let cors_origins = vars
            .get("CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Config {
            database_url: SecretString::from(database_url.clone()),
            redis_url: SecretString::from(redis_url),
            bind_address,
            service_name,
            environment,
            jwks_url,
            jwks_cache_ttl: Duration::from_secs(jwks_cache_ttl_secs),
            jwks_fetch_timeout: Duration::from_secs(jwks_fetch_timeout_secs),
            jwks_min_refresh_interval: Duration::from_secs(jwks_min_refresh_secs),
            jwks_refresh_mode,
            jwt_clock_skew,
            jwt_issuer,
            jwt_audience,
            replay_protection,
            replay_ledger_timeout: Duration::from_millis(replay_ledger_timeout_ms),
            otp_ttl: Duration::from_secs(otp_ttl_secs),
            bcrypt_cost,
            soft_delete_retention_days,
            retention_sweep_interval: Duration::from_secs(sweep_secs),
            cors_origins,
        })
    }
}

fn string_or(vars: &HashMap<String, String>, key: &str, default: &str) -> String {
    vars.get(key)
        .cloned()
        .unwrap_or_else(|| default.to_string())
}

fn non_empty(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_u64(
    vars: &HashMap<String, String>,
    key: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match vars.get(key) {
        Some(value) => value.trim().parse().map_err(|e| ConfigError::InvalidValue {
            var: key,
            reason: format!("must be a non-negative integer, got '{value}': {e}"),
        }),
        None => Ok(default),
    }
}

fn parse_clock_skew(vars: &HashMap<String, String>) -> Result<Duration, ConfigError> {
    let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") else {
        return Ok(DEFAULT_CLOCK_SKEW);
    };

    let value: i64 = value_str.trim().parse().map_err(|e| {
        ConfigError::InvalidJwtClockSkew(format!(
            "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{}': {}",
            value_str, e
        ))
    })?;

    if value < 0 {
        return Err(ConfigError::InvalidJwtClockSkew(format!(
            "JWT_CLOCK_SKEW_SECONDS must not be negative, got {}",
            value
        )));
    }

    let value = value.unsigned_abs();
    if value > MAX_CLOCK_SKEW.as_secs() {
        return Err(ConfigError::InvalidJwtClockSkew(format!(
            "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
            MAX_CLOCK_SKEW.as_secs(),
            value
        )));
    }

    Ok(Duration::from_secs(value))
}
