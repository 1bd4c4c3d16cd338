//! Signing key cache backed by the identity provider's JWKS endpoint.
//!
//! The cache holds an immutable snapshot (`kid -> SigningKey` plus the time
//! it was fetched). Refreshes build a complete new snapshot and swap it in
//! under the write lock, so readers see either the old set or the new set.
//!
//! # Refresh rules
//!
//! - A lookup that finds the snapshot older than the TTL refreshes first.
//! - A lookup for an unknown `kid` on a snapshot it did not just refresh
//!   triggers one refresh, spaced by the minimum refresh interval.
//! - Refreshes are single-flight: callers queued behind an in-flight refresh
//!   reuse its result.
//! - A failed refresh keeps the last known-good snapshot. Only a cache that
//!   has never loaded reports `KeyUnavailable`.

use crate::auth::AuthError;
use crate::observability::metrics::{record_jwks_refresh, set_jwks_keys};
use common::jwt::is_allowed_algorithm;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// Default cache TTL (5 minutes).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default timeout for a single JWKS fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default minimum spacing between throttled refresh attempts.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// JSON Web Key as published by the identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kty: String,

    #[serde(default)]
    pub kid: Option<String>,

    #[serde(default)]
    pub alg: Option<String>,

    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,
}

/// JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksResponse {
    pub keys: Vec<Jwk>,
}

/// A verification key ready for signature checks.
#[derive(Clone)]
pub struct SigningKey {
    pub kid: String,
    pub algorithm: Algorithm,
    decoding_key: DecodingKey,
}

impl SigningKey {
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Build a key from a JWK, accepting only RSA signing keys for an allowed algorithm.
    fn from_jwk(jwk: &Jwk) -> Option<Self> {
        let kid = jwk.kid.as_deref().filter(|k| !k.is_empty())?;

        if jwk.kty != "RSA" {
            tracing::debug!(target: "um.auth.jwks", kid = %kid, kty = %jwk.kty, "Skipping non-RSA key");
            return None;
        }
        if let Some(alg) = jwk.alg.as_deref() {
            if !is_allowed_algorithm(alg) {
                tracing::debug!(target: "um.auth.jwks", kid = %kid, alg = %alg, "Skipping key with disallowed algorithm");
                return None;
            }
        }
        if let Some(key_use) = jwk.key_use.as_deref() {
            if key_use != "sig" {
                tracing::debug!(target: "um.auth.jwks", kid = %kid, key_use = %key_use, "Skipping non-signing key");
                return None;
            }
        }

        let (n, e) = (jwk.n.as_deref()?, jwk.e.as_deref()?);
        match DecodingKey::from_rsa_components(n, e) {
            Ok(decoding_key) => Some(Self {
                kid: kid.to_string(),
                algorithm: Algorithm::RS256,
                decoding_key,
            }),
            Err(e) => {
                tracing::warn!(target: "um.auth.jwks", kid = %kid, error = %e, "Skipping key with invalid RSA components");
                None
            }
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Immutable set of keys from one successful fetch.
struct KeySnapshot {
    keys: HashMap<String, Arc<SigningKey>>,
    fetched_at: Instant,
    generation: u64,
}

/// Why a refresh is being attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshTrigger {
    /// Snapshot missing or older than the TTL.
    Stale,
    /// Fresh snapshot does not contain the requested `kid`.
    UnknownKid,
    /// Explicit refresh (background task, operator).
    Forced,
}

impl RefreshTrigger {
    fn as_str(self) -> &'static str {
        match self {
            RefreshTrigger::Stale => "stale",
            RefreshTrigger::UnknownKid => "unknown_kid",
            RefreshTrigger::Forced => "forced",
        }
    }
}

#[derive(Default)]
struct RefreshState {
    last_attempt: Option<Instant>,
    next_generation: u64,
}

/// Errors from a single JWKS fetch. Absorbed by the cache when a
/// known-good snapshot exists.
#[derive(Debug, Error)]
pub enum JwksFetchError {
    #[error("JWKS request failed: {0}")]
    Request(String),

    #[error("JWKS endpoint returned status {0}")]
    Status(u16),

    #[error("JWKS response could not be parsed: {0}")]
    Parse(String),

    #[error("JWKS response contained no usable signing keys")]
    NoUsableKeys,
}

/// Cache of the remote signing key set.
pub struct KeySetCache {
    jwks_url: String,
    http_client: reqwest::Client,
    cache_ttl: Duration,
    min_refresh_interval: Duration,
    snapshot: RwLock<Option<Arc<KeySnapshot>>>,
    refresh_state: Mutex<RefreshState>,
}

impl KeySetCache {
    /// Create a cache with default TTL, fetch timeout and refresh spacing.
    pub fn new(jwks_url: String) -> Self {
        Self::with_settings(
            jwks_url,
            DEFAULT_CACHE_TTL,
            DEFAULT_FETCH_TIMEOUT,
            DEFAULT_MIN_REFRESH_INTERVAL,
        )
    }

    /// Create a cache with explicit settings.
    ///
    /// # Arguments
    ///
    /// * `jwks_url` - JWKS endpoint of the identity provider
    /// * `cache_ttl` - Age after which a lookup refreshes the snapshot
    /// * `fetch_timeout` - Upper bound for one fetch, including the body
    /// * `min_refresh_interval` - Minimum spacing between throttled refreshes
    pub fn with_settings(
        jwks_url: String,
        cache_ttl: Duration,
        fetch_timeout: Duration,
        min_refresh_interval: Duration,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .connect_timeout(fetch_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "um.auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            jwks_url,
            http_client,
            cache_ttl,
            min_refresh_interval,
            snapshot: RwLock::new(None),
            refresh_state: Mutex::new(RefreshState::default()),
        }
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Look up a signing key by `kid`.
    ///
    /// # Errors
    ///
    /// - `AuthError::KeyUnavailable` if no key set has ever been loaded
    /// - `AuthError::UnknownSigningKey` if the `kid` is absent after the
    ///   permitted refresh
    #[instrument(skip_all, fields(kid = %kid))]
    pub async fn get_key(&self, kid: &str) -> Result<Arc<SigningKey>, AuthError> {
        let current = self.current().await;

        let (snapshot, refreshed_by_this_lookup) = match current {
            Some(snapshot) if !self.is_stale(&snapshot) => (snapshot, false),
            stale_or_empty => {
                let observed = stale_or_empty.as_ref().map(|s| s.generation);
                let snapshot = self.refresh_from(observed, RefreshTrigger::Stale).await?;
                (snapshot, true)
            }
        };

        if let Some(key) = snapshot.keys.get(kid) {
            tracing::debug!(target: "um.auth.jwks", kid = %kid, "JWKS cache hit");
            return Ok(Arc::clone(key));
        }

        if refreshed_by_this_lookup {
            tracing::warn!(target: "um.auth.jwks", kid = %kid, "Key not found in JWKS after refresh");
            return Err(AuthError::UnknownSigningKey);
        }

        // The key may have been rotated in since the last fetch.
        tracing::debug!(target: "um.auth.jwks", kid = %kid, "Key not in cache, refreshing once");
        let snapshot = self
            .refresh_from(Some(snapshot.generation), RefreshTrigger::UnknownKid)
            .await?;

        snapshot.keys.get(kid).map(Arc::clone).ok_or_else(|| {
            tracing::warn!(target: "um.auth.jwks", kid = %kid, "Key not found in JWKS after refresh");
            AuthError::UnknownSigningKey
        })
    }

    /// Fetch the key set now, ignoring TTL and refresh spacing.
    ///
    /// Used by the background refresh task. On failure the previous snapshot
    /// stays in place and the fetch error is returned.
    #[instrument(skip_all, name = "um.auth.jwks.refresh")]
    pub async fn refresh(&self) -> Result<usize, JwksFetchError> {
        let mut state = self.refresh_state.lock().await;
        let snapshot = self.fetch_and_swap(&mut state, RefreshTrigger::Forced).await?;
        Ok(snapshot.keys.len())
    }

    /// Number of keys in the current snapshot, `None` if never loaded.
    pub async fn key_count(&self) -> Option<usize> {
        self.current().await.map(|s| s.keys.len())
    }

    /// Make sure some key set is available, loading it if necessary.
    pub async fn ensure_loaded(&self) -> Result<(), AuthError> {
        match self.current().await {
            Some(_) => Ok(()),
            None => self
                .refresh_from(None, RefreshTrigger::Stale)
                .await
                .map(|_| ()),
        }
    }

    async fn current(&self) -> Option<Arc<KeySnapshot>> {
        self.snapshot.read().await.clone()
    }

    fn is_stale(&self, snapshot: &KeySnapshot) -> bool {
        snapshot.fetched_at.elapsed() > self.cache_ttl
    }

    /// Single-flight refresh.
    ///
    /// `observed` is the generation the caller saw before deciding to refresh.
    /// If another caller replaced it while this one waited for the lock, the
    /// newer snapshot is returned without fetching again.
    async fn refresh_from(
        &self,
        observed: Option<u64>,
        trigger: RefreshTrigger,
    ) -> Result<Arc<KeySnapshot>, AuthError> {
        let mut state = self.refresh_state.lock().await;

        let current = self.current().await;
        if let Some(snapshot) = &current {
            if Some(snapshot.generation) != observed {
                tracing::debug!(target: "um.auth.jwks", "Reusing key set refreshed by a concurrent caller");
                return Ok(Arc::clone(snapshot));
            }
        }

        if let Some(last) = state.last_attempt {
            if last.elapsed() < self.min_refresh_interval {
                tracing::debug!(
                    target: "um.auth.jwks",
                    trigger = trigger.as_str(),
                    "Refresh throttled by minimum refresh interval"
                );
                return current.ok_or(AuthError::KeyUnavailable);
            }
        }

        match self.fetch_and_swap(&mut state, trigger).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => match current {
                Some(snapshot) => {
                    tracing::warn!(
                        target: "um.auth.jwks",
                        error = %e,
                        "JWKS refresh failed, serving last known-good key set"
                    );
                    Ok(snapshot)
                }
                None => {
                    tracing::error!(
                        target: "um.auth.jwks",
                        error = %e,
                        "JWKS refresh failed and no key set has been loaded"
                    );
                    Err(AuthError::KeyUnavailable)
                }
            },
        }
    }

    /// Fetch, build a complete snapshot and swap it in. Caller holds the refresh lock.
    async fn fetch_and_swap(
        &self,
        state: &mut RefreshState,
        trigger: RefreshTrigger,
    ) -> Result<Arc<KeySnapshot>, JwksFetchError> {
        state.last_attempt = Some(Instant::now());
        let start = Instant::now();

        let result = self.fetch_keys().await;
        let status = if result.is_ok() { "success" } else { "error" };
        record_jwks_refresh(trigger.as_str(), status, start.elapsed());

        let keys = result?;
        state.next_generation = state.next_generation.wrapping_add(1);
        let snapshot = Arc::new(KeySnapshot {
            keys,
            fetched_at: Instant::now(),
            generation: state.next_generation,
        });

        *self.snapshot.write().await = Some(Arc::clone(&snapshot));
        set_jwks_keys(snapshot.keys.len());

        tracing::info!(
            target: "um.auth.jwks",
            key_count = snapshot.keys.len(),
            trigger = trigger.as_str(),
            "JWKS cache refreshed"
        );

        Ok(snapshot)
    }

    async fn fetch_keys(&self) -> Result<HashMap<String, Arc<SigningKey>>, JwksFetchError> {
        tracing::debug!(target: "um.auth.jwks", url = %self.jwks_url, "Fetching JWKS");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| JwksFetchError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(JwksFetchError::Status(response.status().as_u16()));
        }

        let jwks: JwksResponse = response
            .json()
            .await
            .map_err(|e| JwksFetchError::Parse(e.to_string()))?;

        let keys: HashMap<String, Arc<SigningKey>> = jwks
            .keys
            .iter()
            .filter_map(SigningKey::from_jwk)
            .map(|key| (key.kid.clone(), Arc::new(key)))
            .collect();

        // An empty set would lock every caller out; keep the previous one instead.
        if keys.is_empty() {
            return Err(JwksFetchError::NoUsableKeys);
        }

        Ok(keys)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_N: &str = "kWngWj0Ea2GRYclAoIsHYSJtXVit8WXdzobLwaH1RPLC6Y83sWDnpmHt9-HSvgxOZbT9iirJiNO7yv8tCVm0Hq1ejXVZ-tfbW6jak1rZkPhbTeApq06SILzNYpkf13r6twERmdqmis5Dmd_13OVIM4gbAaoLfJyzaUT9RLinzjETNsXi2bEsISwFBJRXZsHg5G1sYdH8QRk7cTYirUGWFuvRKsHrNwg9YZV7QgCLukhILYU7FsglJF31j2V8jgnRwWXEgGuAb4MHPiyJ_a0inhap1uJ2-LIfR-HHDLMvStN42PH68b7Iz__rQE3t7bLFOu08tj_t8R5uJxu11rt3Zw";

    fn rsa_jwk(kid: &str) -> serde_json::Value {
        serde_json::json!({
            "kty": "RSA", "kid": kid, "alg": "RS256", "use": "sig", "n": TEST_N, "e": "AQAB"
        })
    }

    fn jwks_body(kids: &[&str]) -> serde_json::Value {
        serde_json::json!({ "keys": kids.iter().map(|k| rsa_jwk(k)).collect::<Vec<_>>() })
    }

    fn cache_for(server: &MockServer, ttl: Duration, min_interval: Duration) -> KeySetCache {
        KeySetCache::with_settings(
            format!("{}/oauth2/jwks", server.uri()),
            ttl,
            Duration::from_secs(2),
            min_interval,
        )
    }

    async fn request_count(server: &MockServer) -> usize {
        server.received_requests().await.map(|r| r.len()).unwrap_or(0)
    }

    #[test]
    fn test_jwk_deserialization() {
        let jwk: Jwk = serde_json::from_value(rsa_jwk("key-1")).unwrap();
        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.kid.as_deref(), Some("key-1"));
        assert_eq!(jwk.alg.as_deref(), Some("RS256"));
        assert_eq!(jwk.key_use.as_deref(), Some("sig"));
        assert_eq!(jwk.e.as_deref(), Some("AQAB"));
    }

    #[test]
    fn test_signing_key_accepts_rs256_rsa() {
        let jwk: Jwk = serde_json::from_value(rsa_jwk("key-1")).unwrap();
        let key = SigningKey::from_jwk(&jwk).unwrap();
        assert_eq!(key.kid, "key-1");
        assert_eq!(key.algorithm, Algorithm::RS256);
    }

    #[test]
    fn test_signing_key_rejects_unusable_jwks() {
        let cases = [
            serde_json::json!({"kty": "OKP", "kid": "k", "crv": "Ed25519", "x": "abc"}),
            serde_json::json!({"kty": "RSA", "kid": "k", "alg": "RS512", "n": TEST_N, "e": "AQAB"}),
            serde_json::json!({"kty": "RSA", "kid": "k", "use": "enc", "n": TEST_N, "e": "AQAB"}),
            serde_json::json!({"kty": "RSA", "alg": "RS256", "n": TEST_N, "e": "AQAB"}),
            serde_json::json!({"kty": "RSA", "kid": "", "n": TEST_N, "e": "AQAB"}),
            serde_json::json!({"kty": "RSA", "kid": "k", "e": "AQAB"}),
        ];
        for case in cases {
            let jwk: Jwk = serde_json::from_value(case.clone()).unwrap();
            assert!(SigningKey::from_jwk(&jwk).is_none(), "{case} must be skipped");
        }
    }

    #[test]
    fn test_signing_key_debug_hides_material() {
        let jwk: Jwk = serde_json::from_value(rsa_jwk("key-1")).unwrap();
        let key = SigningKey::from_jwk(&jwk).unwrap();
        let debug = format!("{key:?}");
        assert!(debug.contains("key-1"));
        assert!(!debug.contains(TEST_N));
    }

    #[tokio::test]
    async fn test_first_lookup_loads_key_set() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth2/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body(&["key-1"])))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache_for(&server, DEFAULT_CACHE_TTL, Duration::ZERO);
        assert_eq!(cache.key_count().await, None);

        let key = cache.get_key("key-1").await.unwrap();
        assert_eq!(key.kid, "key-1");

        // Second lookup is served from cache.
        cache.get_key("key-1").await.unwrap();
        assert_eq!(cache.key_count().await, Some(1));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_without_cache_is_key_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let cache = cache_for(&server, DEFAULT_CACHE_TTL, Duration::ZERO);
        assert_eq!(
            cache.get_key("key-1").await.unwrap_err(),
            AuthError::KeyUnavailable
        );
    }

    #[tokio::test]
    async fn test_unknown_kid_on_cold_cache_fetches_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body(&["key-1"])))
            .mount(&server)
            .await;

        let cache = cache_for(&server, DEFAULT_CACHE_TTL, Duration::ZERO);
        assert_eq!(
            cache.get_key("missing").await.unwrap_err(),
            AuthError::UnknownSigningKey
        );
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_unknown_kid_on_warm_cache_refreshes_exactly_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body(&["key-1"])))
            .mount(&server)
            .await;

        let cache = cache_for(&server, DEFAULT_CACHE_TTL, Duration::ZERO);
        cache.get_key("key-1").await.unwrap();
        assert_eq!(request_count(&server).await, 1);

        assert_eq!(
            cache.get_key("missing").await.unwrap_err(),
            AuthError::UnknownSigningKey
        );
        assert_eq!(request_count(&server).await, 2);
    }

    #[tokio::test]
    async fn test_unknown_kid_picks_up_rotated_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body(&["key-1"])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(jwks_body(&["key-1", "key-2"])),
            )
            .mount(&server)
            .await;

        let cache = cache_for(&server, DEFAULT_CACHE_TTL, Duration::ZERO);
        cache.get_key("key-1").await.unwrap();

        let rotated = cache.get_key("key-2").await.unwrap();
        assert_eq!(rotated.kid, "key-2");
    }

    #[tokio::test]
    async fn test_unknown_kid_refresh_is_throttled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body(&["key-1"])))
            .mount(&server)
            .await;

        let cache = cache_for(&server, DEFAULT_CACHE_TTL, Duration::from_secs(60));
        cache.get_key("key-1").await.unwrap();

        for _ in 0..5 {
            assert_eq!(
                cache.get_key("missing").await.unwrap_err(),
                AuthError::UnknownSigningKey
            );
        }
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_stale_cache_served_when_refresh_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body(&["key-1"])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let cache = cache_for(&server, Duration::from_millis(10), Duration::ZERO);
        cache.get_key("key-1").await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        let key = cache.get_key("key-1").await.unwrap();
        assert_eq!(key.kid, "key-1");
        assert_eq!(request_count(&server).await, 2);
    }

    #[tokio::test]
    async fn test_empty_key_set_does_not_replace_good_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body(&["key-1"])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"keys": []})))
            .mount(&server)
            .await;

        let cache = cache_for(&server, DEFAULT_CACHE_TTL, Duration::ZERO);
        cache.get_key("key-1").await.unwrap();

        assert!(matches!(
            cache.refresh().await,
            Err(JwksFetchError::NoUsableKeys)
        ));
        assert_eq!(cache.key_count().await, Some(1));
        cache.get_key("key-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let cache = cache_for(&server, DEFAULT_CACHE_TTL, Duration::ZERO);
        assert!(matches!(
            cache.refresh().await,
            Err(JwksFetchError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_cold_lookups_share_one_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(jwks_body(&["key-1"]))
                    .set_delay(Duration::from_millis(100)),
            )
            .mount(&server)
            .await;

        let cache = Arc::new(cache_for(&server, DEFAULT_CACHE_TTL, Duration::ZERO));
        let lookups = (0..16).map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_key("key-1").await })
        });

        for result in futures::future::join_all(lookups).await {
            assert!(result.unwrap().is_ok());
        }
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(jwks_body(&["key-1"]))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let cache = KeySetCache::with_settings(
            format!("{}/oauth2/jwks", server.uri()),
            DEFAULT_CACHE_TTL,
            Duration::from_millis(200),
            Duration::ZERO,
        );

        let start = Instant::now();
        assert_eq!(
            cache.get_key("key-1").await.unwrap_err(),
            AuthError::KeyUnavailable
        );
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
