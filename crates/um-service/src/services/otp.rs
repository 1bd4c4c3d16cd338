//! One-time passcodes for email confirmation, invitations and password reset.
//!
//! Codes are six decimal digits drawn from the system CSPRNG and stored under
//! `otp:{email}` with a TTL. Verification compares and deletes in one atomic
//! step, so a code can be consumed at most once even under concurrent attempts.

use crate::errors::UmError;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use redis::aio::MultiplexedConnection;
use redis::Script;
use ring::rand::{SecureRandom, SystemRandom};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::instrument;

/// Key prefix for stored passcodes.
pub const OTP_KEY_PREFIX: &str = "otp:";

/// Number of decimal digits in a passcode.
pub const OTP_DIGITS: usize = 6;

const OTP_MODULUS: u32 = 1_000_000;

/// Largest multiple of `OTP_MODULUS` that fits in a `u32`. Draws at or above
/// this value are rejected so every code is equally likely.
const OTP_REJECTION_BOUND: u32 = 4_294_000_000;

/// Delete the key only if it still holds the presented code.
///
/// KEYS[1]: passcode key, ARGV[1]: presented code.
/// Returns 1 when the code matched and was consumed, 0 otherwise.
const CONSUME_OTP: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('DEL', KEYS[1])
    return 1
else
    return 0
end
"#;

pub fn otp_key(email: &str) -> String {
    format!("{OTP_KEY_PREFIX}{email}")
}

/// Generate a uniformly distributed six-digit passcode.
///
/// # Errors
///
/// Returns `UmError::Internal` if the system random source fails.
pub fn generate_code() -> Result<SecretString, UmError> {
    let rng = SystemRandom::new();
    loop {
        let mut bytes = [0u8; 4];
        rng.fill(&mut bytes).map_err(|_| {
            tracing::error!(target: "um.services.otp", "System random source failed");
            UmError::Internal
        })?;
        let value = u32::from_be_bytes(bytes);
        if value < OTP_REJECTION_BOUND {
            let code = format!("{:0width$}", value % OTP_MODULUS, width = OTP_DIGITS);
            return Ok(SecretString::from(code));
        }
    }
}

/// Storage for outstanding passcodes, keyed by email.
#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Store `code` for `email`, replacing any outstanding code.
    async fn store(&self, email: &str, code: &SecretString, ttl: Duration) -> Result<(), UmError>;

    /// Consume `code` for `email`. Returns `true` only for the first caller
    /// presenting the current, unexpired code.
    async fn consume(&self, email: &str, code: &SecretString) -> Result<bool, UmError>;
}

/// Generate a fresh code for `email` and store it.
#[instrument(skip_all, name = "um.services.otp.issue")]
pub async fn issue(
    store: &dyn OtpStore,
    email: &str,
    ttl: Duration,
) -> Result<SecretString, UmError> {
    let code = generate_code()?;
    store.store(email, &code, ttl).await?;
    tracing::debug!(target: "um.services.otp", ttl_secs = ttl.as_secs(), "Passcode issued");
    Ok(code)
}

/// Redis-backed store.
///
/// Uses the shared multiplexed connection; each call clones it, which is
/// cheap and lets calls proceed concurrently.
#[derive(Clone)]
pub struct RedisOtpStore {
    connection: MultiplexedConnection,
    timeout: Duration,
    consume_script: Arc<Script>,
}

impl RedisOtpStore {
    pub fn new(connection: MultiplexedConnection, timeout: Duration) -> Self {
        Self {
            connection,
            timeout,
            consume_script: Arc::new(Script::new(CONSUME_OTP)),
        }
    }
}

fn unavailable(operation: &str, err: impl std::fmt::Display) -> UmError {
    tracing::warn!(target: "um.services.otp", operation, error = %err, "Passcode store call failed");
    UmError::ServiceUnavailable(format!("passcode store {operation} failed"))
}

#[async_trait]
impl OtpStore for RedisOtpStore {
    async fn store(&self, email: &str, code: &SecretString, ttl: Duration) -> Result<(), UmError> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(otp_key(email))
            .arg(code.expose_secret())
            .arg("EX")
            .arg(ttl.as_secs().max(1));

        let result: redis::RedisResult<()> =
            tokio::time::timeout(self.timeout, cmd.query_async(&mut conn))
                .await
                .map_err(|_| unavailable("store", "timed out"))?;
        result.map_err(|e| unavailable("store", e))
    }

    async fn consume(&self, email: &str, code: &SecretString) -> Result<bool, UmError> {
        let mut conn = self.connection.clone();
        let key = otp_key(email);
        let mut invocation = self.consume_script.key(&key);
        invocation.arg(code.expose_secret());

        let result: redis::RedisResult<i64> =
            tokio::time::timeout(self.timeout, invocation.invoke_async(&mut conn))
                .await
                .map_err(|_| unavailable("consume", "timed out"))?;
        let consumed = result.map_err(|e| unavailable("consume", e))?;
        Ok(consumed == 1)
    }
}

/// Process-local store for tests and single-instance development.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOtpStore {
    entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl InMemoryOtpStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The outstanding, unexpired code for `email`.
    ///
    /// Stands in for reading the delivered email in tests.
    pub fn peek(&self, email: &str) -> Option<SecretString> {
        let now = Instant::now();
        let entries = self.entries.lock().ok()?;
        entries
            .get(&otp_key(email))
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(code, _)| SecretString::from(code.clone()))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>>, UmError> {
        self.entries.lock().map_err(|_| {
            tracing::error!(target: "um.services.otp", "Passcode store lock poisoned");
            UmError::Internal
        })
    }
}

#[async_trait]
impl OtpStore for InMemoryOtpStore {
    async fn store(&self, email: &str, code: &SecretString, ttl: Duration) -> Result<(), UmError> {
        let mut entries = self.lock()?;
        entries.insert(
            otp_key(email),
            (code.expose_secret().to_string(), Instant::now() + ttl),
        );
        Ok(())
    }

    async fn consume(&self, email: &str, code: &SecretString) -> Result<bool, UmError> {
        let mut entries = self.lock()?;
        let key = otp_key(email);
        let now = Instant::now();

        let matches = entries
            .get(&key)
            .is_some_and(|(stored, expires_at)| *expires_at > now && stored == code.expose_secret());
        if matches {
            entries.remove(&key);
        }
        Ok(matches)
    }
}
