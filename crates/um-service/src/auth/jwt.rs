//! Bearer token verification.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - The header `alg` must be RS256 before a key is resolved, and the
//!   verifier is pinned to RS256
//! - `exp` is required; `exp` and `nbf` are checked against one explicit
//!   `now` with symmetric, inclusive clock skew
//! - Optional replay protection records each `jti` exactly once
//! - Every failure reason is logged and counted, never returned to clients

use crate::auth::claims::TokenClaims;
use crate::auth::jwks::{KeySetCache, SigningKey};
use crate::auth::replay::{LedgerOutcome, ReplayLedger, ReplayProtection};
use crate::auth::AuthError;
use crate::observability::metrics::{record_replay_check, record_token_validation};
use common::jwt::{extract_header, validate_time_claims_at, DEFAULT_CLOCK_SKEW};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, Validation};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Verifies bearer tokens against the cached signing key set.
pub struct TokenValidator {
    keys: Arc<KeySetCache>,
    clock_skew: Duration,
    issuer: Option<String>,
    audience: Option<String>,
    replay: Option<(ReplayProtection, Arc<dyn ReplayLedger>)>,
}

impl TokenValidator {
    /// Create a validator with no issuer/audience checks and replay protection disabled.
    pub fn new(keys: Arc<KeySetCache>, clock_skew: Duration) -> Self {
        Self {
            keys,
            clock_skew,
            issuer: None,
            audience: None,
            replay: None,
        }
    }

    /// Validator with the default 60 second clock skew.
    pub fn with_default_skew(keys: Arc<KeySetCache>) -> Self {
        Self::new(keys, DEFAULT_CLOCK_SKEW)
    }

    /// Require `iss` to equal `issuer`.
    pub fn with_issuer(mut self, issuer: Option<String>) -> Self {
        self.issuer = issuer;
        self
    }

    /// Require `aud` to contain `audience`.
    pub fn with_audience(mut self, audience: Option<String>) -> Self {
        self.audience = audience;
        self
    }

    /// Enable replay protection. `ReplayProtection::Disabled` clears it.
    pub fn with_replay_protection(
        mut self,
        mode: ReplayProtection,
        ledger: Arc<dyn ReplayLedger>,
    ) -> Self {
        self.replay = match mode {
            ReplayProtection::Disabled => None,
            mode => Some((mode, ledger)),
        };
        self
    }

    pub fn key_cache(&self) -> &Arc<KeySetCache> {
        &self.keys
    }

    pub fn replay_protection(&self) -> ReplayProtection {
        self.replay
            .as_ref()
            .map_or(ReplayProtection::Disabled, |(mode, _)| *mode)
    }

    /// Verify a raw bearer token against the current time.
    ///
    /// # Errors
    ///
    /// Returns the `AuthError` describing the first failed check. All of
    /// them are authentication failures (401).
    #[instrument(skip_all, name = "um.auth.verify")]
    pub async fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        self.verify_at(token, chrono::Utc::now().timestamp()).await
    }

    /// Verify a token against an explicit `now` (Unix seconds).
    pub async fn verify_at(&self, token: &str, now: i64) -> Result<TokenClaims, AuthError> {
        let result = self.verify_inner(token, now).await;
        match &result {
            Ok(_) => {
                tracing::debug!(target: "um.auth.jwt", "Token validated successfully");
                record_token_validation("success", "none");
            }
            Err(e) => {
                tracing::debug!(target: "um.auth.jwt", reason = e.reason(), "Token rejected");
                record_token_validation("error", e.reason());
            }
        }
        result
    }

    async fn verify_inner(&self, token: &str, now: i64) -> Result<TokenClaims, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        // 1. Unverified header: size, structure, alg allow-list, kid
        let header = extract_header(token)?;

        // 2. Resolve the key (may refresh the cache)
        let key = self.keys.get_key(&header.kid).await?;

        // 3. Signature and claim shape
        let claims = self.decode_claims(token, &key)?;

        // 4. Time claims with symmetric skew
        validate_time_claims_at(claims.exp, claims.nbf, self.clock_skew, now)?;

        // 5. Single use
        self.check_replay(&claims, now).await?;

        Ok(claims)
    }

    fn decode_claims(&self, token: &str, key: &SigningKey) -> Result<TokenClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::RS256);
        // Time claims are checked separately against an explicit `now`.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        // A configured issuer or audience must be present, not merely matched if present.
        let mut required = vec!["exp"];
        if self.issuer.is_some() {
            required.push("iss");
        }
        if self.audience.is_some() {
            required.push("aud");
        }
        validation.set_required_spec_claims(&required);

        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }

        decode::<TokenClaims>(token, key.decoding_key(), &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(target: "um.auth.jwt", error = %e, kid = %key.kid, "Token verification failed");
                match e.kind() {
                    ErrorKind::InvalidAlgorithm => AuthError::UnsupportedAlgorithm,
                    ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Utf8(_) => {
                        AuthError::MalformedToken
                    }
                    _ => AuthError::TokenInvalid,
                }
            })
    }

    async fn check_replay(&self, claims: &TokenClaims, now: i64) -> Result<(), AuthError> {
        let Some((mode, ledger)) = &self.replay else {
            return Ok(());
        };

        let Some(jti) = claims.jti.as_deref().filter(|j| !j.is_empty()) else {
            tracing::debug!(target: "um.auth.jwt", "Token has no jti, replay check skipped");
            record_replay_check("skipped");
            return Ok(());
        };

        // Keep the entry for as long as the token could still be accepted.
        #[allow(clippy::cast_possible_wrap)]
        let skew = self.clock_skew.as_secs() as i64;
        let remaining = claims.exp.saturating_add(skew).saturating_sub(now).max(1);
        let ttl = Duration::from_secs(remaining.unsigned_abs());

        match ledger.record_if_absent(jti, ttl).await {
            Ok(LedgerOutcome::Recorded) => {
                record_replay_check("recorded");
                Ok(())
            }
            Ok(LedgerOutcome::AlreadySeen) => {
                tracing::warn!(target: "um.auth.jwt", "Token replay detected");
                record_replay_check("replay");
                Err(AuthError::ReplayDetected)
            }
            Err(e) => {
                record_replay_check("ledger_error");
                match mode {
                    ReplayProtection::Enforced => {
                        tracing::error!(target: "um.auth.jwt", error = %e, "Replay ledger unavailable, rejecting token");
                        Err(AuthError::ReplayLedgerUnavailable)
                    }
                    _ => {
                        tracing::warn!(target: "um.auth.jwt", error = %e, "Replay ledger unavailable, accepting token");
                        Ok(())
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::replay::{InMemoryReplayLedger, LedgerError};
    use async_trait::async_trait;
    use um_test_utils::{mount_jwks, TestSigningKey, TestTokenBuilder, JWKS_PATH};
    use wiremock::MockServer;

    const NOW: i64 = 1_900_000_000;

    async fn validator_with(server: &MockServer) -> TokenValidator {
        let cache = KeySetCache::with_settings(
            format!("{}{}", server.uri(), JWKS_PATH),
            Duration::from_secs(300),
            Duration::from_secs(2),
            Duration::ZERO,
        );
        TokenValidator::with_default_skew(Arc::new(cache))
    }

    async fn setup() -> (MockServer, TestSigningKey, TokenValidator) {
        let server = MockServer::start().await;
        let key = TestSigningKey::primary();
        mount_jwks(&server, &[&key]).await;
        let validator = validator_with(&server).await;
        (server, key, validator)
    }

    struct FailingLedger;

    #[async_trait]
    impl ReplayLedger for FailingLedger {
        async fn record_if_absent(
            &self,
            _jti: &str,
            _ttl: Duration,
        ) -> Result<LedgerOutcome, LedgerError> {
            Err(LedgerError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_valid_token() {
        let (_server, key, validator) = setup().await;
        let token = key.sign(
            &TestTokenBuilder::new()
                .subject("user-1")
                .tenant("acme")
                .roles(&["ROLE_ADMIN"])
                .expires_at(NOW + 600)
                .build(),
        );

        let claims = validator.verify_at(&token, NOW).await.unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.tenant.as_deref(), Some("acme"));
        assert_eq!(claims.roles, vec!["ROLE_ADMIN"]);
    }

    #[tokio::test]
    async fn test_empty_token_is_missing() {
        let (_server, _key, validator) = setup().await;
        assert_eq!(
            validator.verify_at("  ", NOW).await.unwrap_err(),
            AuthError::MissingToken
        );
    }

    #[tokio::test]
    async fn test_exp_boundary_is_inclusive() {
        let (_server, key, validator) = setup().await;

        let at_boundary = key.sign(&TestTokenBuilder::new().expires_at(NOW - 60).build());
        assert!(validator.verify_at(&at_boundary, NOW).await.is_ok());

        let past_boundary = key.sign(&TestTokenBuilder::new().expires_at(NOW - 61).build());
        assert_eq!(
            validator.verify_at(&past_boundary, NOW).await.unwrap_err(),
            AuthError::TokenExpired
        );
    }

    #[tokio::test]
    async fn test_nbf_boundary_is_inclusive() {
        let (_server, key, validator) = setup().await;

        let at_boundary = key.sign(
            &TestTokenBuilder::new()
                .expires_at(NOW + 600)
                .not_before(NOW + 60)
                .build(),
        );
        assert!(validator.verify_at(&at_boundary, NOW).await.is_ok());

        let too_early = key.sign(
            &TestTokenBuilder::new()
                .expires_at(NOW + 600)
                .not_before(NOW + 61)
                .build(),
        );
        assert_eq!(
            validator.verify_at(&too_early, NOW).await.unwrap_err(),
            AuthError::TokenNotYetValid
        );
    }

    #[tokio::test]
    async fn test_missing_exp_is_invalid() {
        let (_server, key, validator) = setup().await;
        let token = key.sign(&serde_json::json!({"sub": "user-1", "roles": []}));
        assert_eq!(
            validator.verify_at(&token, NOW).await.unwrap_err(),
            AuthError::TokenInvalid
        );
    }

    #[tokio::test]
    async fn test_wrong_key_signature_is_invalid() {
        let (_server, _key, validator) = setup().await;
        // Signed by the secondary key but claiming the primary kid.
        let impostor = TestSigningKey::secondary().with_kid(&TestSigningKey::primary().kid);
        let token = impostor.sign(&TestTokenBuilder::new().expires_at(NOW + 600).build());

        assert_eq!(
            validator.verify_at(&token, NOW).await.unwrap_err(),
            AuthError::TokenInvalid
        );
    }

    #[tokio::test]
    async fn test_tampered_payload_is_invalid() {
        let (_server, key, validator) = setup().await;
        let token = key.sign(
            &TestTokenBuilder::new()
                .roles(&["ROLE_ANNOTATOR"])
                .expires_at(NOW + 600)
                .build(),
        );
        let forged_claims = TestTokenBuilder::new()
            .roles(&["ROLE_ADMIN"])
            .expires_at(NOW + 600)
            .build();
        let tampered = um_test_utils::replace_payload(&token, &forged_claims);

        assert_eq!(
            validator.verify_at(&tampered, NOW).await.unwrap_err(),
            AuthError::TokenInvalid
        );
    }

    #[tokio::test]
    async fn test_issuer_and_audience_enforced_when_configured() {
        let (server, key, _validator) = setup().await;
        let validator = validator_with(&server)
            .await
            .with_issuer(Some("https://idp.example.com".to_string()))
            .with_audience(Some("user-management".to_string()));

        let good = key.sign(
            &TestTokenBuilder::new()
                .expires_at(NOW + 600)
                .issuer("https://idp.example.com")
                .audience("user-management")
                .build(),
        );
        assert!(validator.verify_at(&good, NOW).await.is_ok());

        let wrong_issuer = key.sign(
            &TestTokenBuilder::new()
                .expires_at(NOW + 600)
                .issuer("https://evil.example.com")
                .audience("user-management")
                .build(),
        );
        assert_eq!(
            validator.verify_at(&wrong_issuer, NOW).await.unwrap_err(),
            AuthError::TokenInvalid
        );
    }

    #[tokio::test]
    async fn test_configured_issuer_is_required() {
        let (server, key, _validator) = setup().await;
        let validator = validator_with(&server)
            .await
            .with_issuer(Some("https://idp.example.com".to_string()));

        let without_iss = key.sign(&TestTokenBuilder::new().expires_at(NOW + 600).build());
        assert_eq!(
            validator.verify_at(&without_iss, NOW).await.unwrap_err(),
            AuthError::TokenInvalid
        );
    }

    #[tokio::test]
    async fn test_configured_audience_is_required() {
        let (server, key, _validator) = setup().await;
        let validator = validator_with(&server)
            .await
            .with_audience(Some("user-management".to_string()));

        let without_aud = key.sign(&TestTokenBuilder::new().expires_at(NOW + 600).build());
        assert_eq!(
            validator.verify_at(&without_aud, NOW).await.unwrap_err(),
            AuthError::TokenInvalid
        );

        let with_aud = key.sign(
            &TestTokenBuilder::new()
                .expires_at(NOW + 600)
                .audience("user-management")
                .build(),
        );
        assert!(validator.verify_at(&with_aud, NOW).await.is_ok());
    }

    #[tokio::test]
    async fn test_audience_ignored_when_not_configured() {
        let (_server, key, validator) = setup().await;
        let token = key.sign(
            &TestTokenBuilder::new()
                .expires_at(NOW + 600)
                .audience("some-other-service")
                .build(),
        );
        assert!(validator.verify_at(&token, NOW).await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_is_idempotent_without_replay_protection() {
        let (_server, key, validator) = setup().await;
        let token = key.sign(
            &TestTokenBuilder::new()
                .jti("jti-1")
                .expires_at(NOW + 600)
                .build(),
        );

        let first = validator.verify_at(&token, NOW).await.unwrap();
        let second = validator.verify_at(&token, NOW).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_replay_rejected_second_time() {
        let (_server, key, validator) = setup().await;
        let validator = validator.with_replay_protection(
            ReplayProtection::Enforced,
            Arc::new(InMemoryReplayLedger::new()),
        );
        let token = key.sign(
            &TestTokenBuilder::new()
                .jti("jti-once")
                .expires_at(NOW + 600)
                .build(),
        );

        assert!(validator.verify_at(&token, NOW).await.is_ok());
        let err = validator.verify_at(&token, NOW).await.unwrap_err();
        assert_eq!(err, AuthError::ReplayDetected);
        assert_eq!(err.to_string(), "token replay detected");
    }

    #[tokio::test]
    async fn test_replay_check_skipped_without_jti() {
        let (_server, key, validator) = setup().await;
        let ledger = Arc::new(InMemoryReplayLedger::new());
        let validator =
            validator.with_replay_protection(ReplayProtection::Enforced, ledger.clone());
        let token = key.sign(&TestTokenBuilder::new().expires_at(NOW + 600).build());

        assert!(validator.verify_at(&token, NOW).await.is_ok());
        assert!(validator.verify_at(&token, NOW).await.is_ok());
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_ledger_outage_advisory_accepts() {
        let (_server, key, validator) = setup().await;
        let validator =
            validator.with_replay_protection(ReplayProtection::Advisory, Arc::new(FailingLedger));
        let token = key.sign(&TestTokenBuilder::new().jti("j").expires_at(NOW + 600).build());

        assert!(validator.verify_at(&token, NOW).await.is_ok());
    }

    #[tokio::test]
    async fn test_ledger_outage_enforced_rejects() {
        let (_server, key, validator) = setup().await;
        let validator =
            validator.with_replay_protection(ReplayProtection::Enforced, Arc::new(FailingLedger));
        let token = key.sign(&TestTokenBuilder::new().jti("j").expires_at(NOW + 600).build());

        assert_eq!(
            validator.verify_at(&token, NOW).await.unwrap_err(),
            AuthError::ReplayLedgerUnavailable
        );
    }

    #[tokio::test]
    async fn test_disabled_mode_clears_ledger() {
        let (_server, _key, validator) = setup().await;
        let validator = validator.with_replay_protection(
            ReplayProtection::Disabled,
            Arc::new(InMemoryReplayLedger::new()),
        );
        assert_eq!(validator.replay_protection(), ReplayProtection::Disabled);
    }

    #[tokio::test]
    async fn test_rejected_token_does_not_consume_jti() {
        let (_server, key, validator) = setup().await;
        let ledger = Arc::new(InMemoryReplayLedger::new());
        let validator =
            validator.with_replay_protection(ReplayProtection::Enforced, ledger.clone());
        let expired = key.sign(&TestTokenBuilder::new().jti("j").expires_at(NOW - 3600).build());

        assert_eq!(
            validator.verify_at(&expired, NOW).await.unwrap_err(),
            AuthError::TokenExpired
        );
        assert!(ledger.is_empty());
    }
}
