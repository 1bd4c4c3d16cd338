//! Builder patterns for test token claims, plus helpers that forge tokens
//! a real identity provider would never issue.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Map, Value};

/// Builder for access token claims.
///
/// # Example
/// ```rust,ignore
/// let claims = TestTokenBuilder::new()
///     .subject("alice")
///     .tenant("acme")
///     .roles(&["ROLE_ADMIN"])
///     .expires_in(3600)
///     .build();
/// ```
pub struct TestTokenBuilder {
    sub: String,
    tenant: Option<String>,
    roles: Vec<String>,
    exp: i64,
    iat: i64,
    nbf: Option<i64>,
    jti: Option<String>,
    iss: Option<String>,
    aud: Option<String>,
}

impl TestTokenBuilder {
    /// Defaults: subject `test-subject`, no roles, expires in one hour.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            sub: "test-subject".to_string(),
            tenant: None,
            roles: Vec::new(),
            exp: (now + Duration::seconds(3600)).timestamp(),
            iat: now.timestamp(),
            nbf: None,
            jti: None,
            iss: None,
            aud: None,
        }
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.sub = subject.to_string();
        self
    }

    pub fn tenant(mut self, tenant: &str) -> Self {
        self.tenant = Some(tenant.to_string());
        self
    }

    pub fn roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(ToString::to_string).collect();
        self
    }

    /// Set expiration in seconds from now. Negative values build expired tokens.
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    pub fn expires_at(mut self, timestamp: i64) -> Self {
        self.exp = timestamp;
        self
    }

    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = timestamp;
        self
    }

    pub fn not_before(mut self, timestamp: i64) -> Self {
        self.nbf = Some(timestamp);
        self
    }

    pub fn jti(mut self, jti: &str) -> Self {
        self.jti = Some(jti.to_string());
        self
    }

    pub fn issuer(mut self, issuer: &str) -> Self {
        self.iss = Some(issuer.to_string());
        self
    }

    pub fn audience(mut self, audience: &str) -> Self {
        self.aud = Some(audience.to_string());
        self
    }

    /// Build the claims as a JSON value. Unset optional claims are omitted.
    pub fn build(self) -> Value {
        let mut claims = Map::new();
        claims.insert("sub".to_string(), json!(self.sub));
        claims.insert("roles".to_string(), json!(self.roles));
        claims.insert("exp".to_string(), json!(self.exp));
        claims.insert("iat".to_string(), json!(self.iat));
        let optional = [
            ("tenant", self.tenant.map(Value::from)),
            ("nbf", self.nbf.map(Value::from)),
            ("jti", self.jti.map(Value::from)),
            ("iss", self.iss.map(Value::from)),
            ("aud", self.aud.map(Value::from)),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                claims.insert(name.to_string(), value);
            }
        }
        Value::Object(claims)
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_segment(value: &Value) -> String {
    URL_SAFE_NO_PAD.encode(serde_json::to_vec(value).expect("JSON value serializes"))
}

/// Swap the payload of a signed token, keeping its header and signature.
pub fn replace_payload(token: &str, claims: &Value) -> String {
    let parts: Vec<&str> = token.split('.').collect();
    assert_eq!(parts.len(), 3, "expected a compact JWS");
    format!("{}.{}.{}", parts[0], encode_segment(claims), parts[2])
}

/// An unsigned token (`alg: none`) with an empty signature segment.
pub fn forge_unsigned(kid: &str, claims: &Value) -> String {
    let header = json!({"alg": "none", "typ": "JWT", "kid": kid});
    format!("{}.{}.", encode_segment(&header), encode_segment(claims))
}

/// A token MACed with HS256 under `secret`, as in key-confusion attacks
/// that reuse a public key as an HMAC secret.
pub fn forge_hs256(kid: &str, secret: &[u8], claims: &Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(kid.to_string());
    encode(&header, claims, &EncodingKey::from_secret(secret)).expect("HS256 encoding succeeds")
}

/// A token whose header names `alg` and carries a dummy signature.
pub fn forge_with_alg(alg: &str, kid: &str, claims: &Value) -> String {
    let header = json!({"alg": alg, "typ": "JWT", "kid": kid});
    format!(
        "{}.{}.{}",
        encode_segment(&header),
        encode_segment(claims),
        URL_SAFE_NO_PAD.encode(b"not-a-signature")
    )
}
