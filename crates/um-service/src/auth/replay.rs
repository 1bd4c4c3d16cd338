//! Single-use token ledger for replay protection.
//!
//! A token ID is recorded with an atomic set-if-absent whose TTL equals the
//! token's remaining lifetime, so entries disappear once the token could no
//! longer validate anyway. Concurrent presentations of one `jti` race on the
//! store's atomic write and exactly one of them wins.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

pub use crate::config::ReplayProtection;

/// Key prefix for recorded token IDs.
pub const REPLAY_KEY_PREFIX: &str = "jwt:jti:";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("replay ledger unavailable: {0}")]
    Unavailable(String),

    #[error("replay ledger call timed out after {0:?}")]
    Timeout(Duration),
}

/// Outcome of recording a token ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOutcome {
    /// First presentation; the ID is now recorded.
    Recorded,
    /// The ID was already recorded.
    AlreadySeen,
}

/// Store of consumed token IDs.
#[async_trait]
pub trait ReplayLedger: Send + Sync {
    /// Atomically record `jti` if it is not already present.
    async fn record_if_absent(&self, jti: &str, ttl: Duration)
        -> Result<LedgerOutcome, LedgerError>;
}

pub fn replay_key(jti: &str) -> String {
    format!("{REPLAY_KEY_PREFIX}{jti}")
}

/// Redis-backed ledger using `SET key 1 NX EX ttl`.
#[derive(Clone)]
pub struct RedisReplayLedger {
    connection: MultiplexedConnection,
    timeout: Duration,
}

impl RedisReplayLedger {
    pub fn new(connection: MultiplexedConnection, timeout: Duration) -> Self {
        Self {
            connection,
            timeout,
        }
    }
}

#[async_trait]
impl ReplayLedger for RedisReplayLedger {
    async fn record_if_absent(
        &self,
        jti: &str,
        ttl: Duration,
    ) -> Result<LedgerOutcome, LedgerError> {
        let mut conn = self.connection.clone();
        // Redis rejects EX 0.
        let ttl_secs = ttl.as_secs().max(1);

        let mut cmd = redis::cmd("SET");
        cmd.arg(replay_key(jti))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs);

        // SET NX replies OK when written and nil when the key exists.
        let result: redis::RedisResult<Option<String>> =
            tokio::time::timeout(self.timeout, cmd.query_async(&mut conn))
                .await
                .map_err(|_| LedgerError::Timeout(self.timeout))?;
        let reply = result.map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        Ok(match reply {
            Some(_) => LedgerOutcome::Recorded,
            None => LedgerOutcome::AlreadySeen,
        })
    }
}

/// Process-local ledger for tests and single-instance deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReplayLedger {
    entries: Arc<Mutex<HashMap<String, Instant>>>,
}

impl InMemoryReplayLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|entries| entries.values().filter(|exp| **exp > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReplayLedger for InMemoryReplayLedger {
    async fn record_if_absent(
        &self,
        jti: &str,
        ttl: Duration,
    ) -> Result<LedgerOutcome, LedgerError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".to_string()))?;

        let now = Instant::now();
        entries.retain(|_, expires_at| *expires_at > now);

        let key = replay_key(jti);
        if entries.contains_key(&key) {
            return Ok(LedgerOutcome::AlreadySeen);
        }
        entries.insert(key, now + ttl.max(Duration::from_secs(1)));
        Ok(LedgerOutcome::Recorded)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_key_format() {
        assert_eq!(replay_key("abc-123"), "jwt:jti:abc-123");
    }

    #[tokio::test]
    async fn test_in_memory_records_once() {
        let ledger = InMemoryReplayLedger::new();
        let ttl = Duration::from_secs(60);

        assert_eq!(
            ledger.record_if_absent("jti-1", ttl).await.unwrap(),
            LedgerOutcome::Recorded
        );
        assert_eq!(
            ledger.record_if_absent("jti-1", ttl).await.unwrap(),
            LedgerOutcome::AlreadySeen
        );
        assert_eq!(
            ledger.record_if_absent("jti-2", ttl).await.unwrap(),
            LedgerOutcome::Recorded
        );
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test]
    async fn test_in_memory_entries_expire() {
        let ledger = InMemoryReplayLedger::new();
        {
            let mut entries = ledger.entries.lock().unwrap();
            entries.insert(replay_key("old"), Instant::now());
        }
        assert!(ledger.is_empty());
        assert_eq!(
            ledger
                .record_if_absent("old", Duration::from_secs(60))
                .await
                .unwrap(),
            LedgerOutcome::Recorded
        );
    }

    #[tokio::test]
    async fn test_in_memory_concurrent_single_winner() {
        let ledger = Arc::new(InMemoryReplayLedger::new());
        let tasks = (0..32).map(|_| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move {
                ledger
                    .record_if_absent("shared", Duration::from_secs(60))
                    .await
                    .unwrap()
            })
        });

        let outcomes = futures::future::join_all(tasks).await;
        let recorded = outcomes
            .into_iter()
            .filter(|o| matches!(o, Ok(LedgerOutcome::Recorded)))
            .count();
        assert_eq!(recorded, 1);
    }
}
