//! Fixed RSA-2048 signing keys for testing.
//!
//! The private keys live in `fixtures/` and are compiled in, so every test
//! run signs with the same keys and the JWKS documents are stable.

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};

const PRIMARY_PEM: &str = include_str!("../fixtures/signing_key_1.pem");
const SECONDARY_PEM: &str = include_str!("../fixtures/signing_key_2.pem");

/// Base64url modulus of `signing_key_1.pem`.
const PRIMARY_N: &str = "kWngWj0Ea2GRYclAoIsHYSJtXVit8WXdzobLwaH1RPLC6Y83sWDnpmHt9-HSvgxOZbT9iirJiNO7yv8tCVm0Hq1ejXVZ-tfbW6jak1rZkPhbTeApq06SILzNYpkf13r6twERmdqmis5Dmd_13OVIM4gbAaoLfJyzaUT9RLinzjETNsXi2bEsISwFBJRXZsHg5G1sYdH8QRk7cTYirUGWFuvRKsHrNwg9YZV7QgCLukhILYU7FsglJF31j2V8jgnRwWXEgGuAb4MHPiyJ_a0inhap1uJ2-LIfR-HHDLMvStN42PH68b7Iz__rQE3t7bLFOu08tj_t8R5uJxu11rt3Zw";

/// Base64url modulus of `signing_key_2.pem`.
const SECONDARY_N: &str = "0Uq-NmPbYoXstBK2vKhBxeAzs2HtwQ8pVxSa0Vkr7ROVQNty2l45WzbMSGAvvA7__Uw-cN9eT_OFJoRNsjMDtDDeWAB0hoyrQpBvylj2J8ZyO-BbLUb5tcp1qHITxF1cHtr7oyaakFtYubvaNIdhWrPUoSjzTxpT96oc8AHuu_Rs4BaxW2YYXOlrm1rjO4x8TISaR5m0fGf2lt1LG-k3N3fu0fSf2L2mDVJx2rAsLJJ-ohHMosmX-oHgELyLpNdsBGtvMzFmhk0AlBBN9miqhaYvDXFk06LKi9ggIE6kuwJ_TmiqhnzQEcw1BX9fqP_zawdfdAXnMwF4LE2uCSebVQ";

/// Public exponent 65537.
const RSA_E: &str = "AQAB";

/// An RSA key pair plus the `kid` it is published under.
///
/// # Example
/// ```rust,ignore
/// let key = TestSigningKey::primary();
/// let token = key.sign(&TestTokenBuilder::new().build());
/// ```
#[derive(Debug, Clone)]
pub struct TestSigningKey {
    pub kid: String,
    private_pem: &'static str,
    modulus: &'static str,
}

impl TestSigningKey {
    /// The key most tests sign with.
    pub fn primary() -> Self {
        Self {
            kid: "um-test-key-1".to_string(),
            private_pem: PRIMARY_PEM,
            modulus: PRIMARY_N,
        }
    }

    /// A second, unrelated key (rotation and wrong-key tests).
    pub fn secondary() -> Self {
        Self {
            kid: "um-test-key-2".to_string(),
            private_pem: SECONDARY_PEM,
            modulus: SECONDARY_N,
        }
    }

    /// Same key material published under a different `kid`.
    pub fn with_kid(mut self, kid: &str) -> Self {
        self.kid = kid.to_string();
        self
    }

    pub fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_rsa_pem(self.private_pem.as_bytes())
            .expect("fixture PEM must parse as an RSA private key")
    }

    /// Sign `claims` with RS256 and this key's `kid` in the header.
    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        self.sign_with_header(&header, claims)
    }

    /// Sign with a caller-supplied header. The header's `alg` must be an
    /// RSA algorithm.
    pub fn sign_with_header(&self, header: &Header, claims: &Value) -> String {
        encode(header, claims, &self.encoding_key()).expect("signing with fixture key must succeed")
    }

    /// The public half as a JWK, as an identity provider would publish it.
    pub fn public_jwk(&self) -> Value {
        json!({
            "kty": "RSA",
            "kid": self.kid,
            "alg": "RS256",
            "use": "sig",
            "n": self.modulus,
            "e": RSA_E,
        })
    }
}
