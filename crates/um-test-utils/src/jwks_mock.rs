//! Mock JWKS endpoint on `wiremock`.

use crate::crypto_fixtures::TestSigningKey;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock serves the key set on.
pub const JWKS_PATH: &str = "/oauth2/jwks";

/// JWKS document publishing the public half of each key.
pub fn jwks_document(keys: &[&TestSigningKey]) -> Value {
    json!({ "keys": keys.iter().map(|k| k.public_jwk()).collect::<Vec<_>>() })
}

/// Serve `keys` at [`JWKS_PATH`] for any number of requests.
pub async fn mount_jwks(server: &MockServer, keys: &[&TestSigningKey]) {
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document(keys)))
        .mount(server)
        .await;
}

/// Serve `keys` and assert on drop of the server that exactly `times`
/// fetches happened.
pub async fn mount_jwks_expecting(server: &MockServer, keys: &[&TestSigningKey], times: u64) {
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document(keys)))
        .expect(times)
        .mount(server)
        .await;
}

/// Answer every fetch with `status` and no key set.
pub async fn mount_jwks_failure(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Full JWKS URL for a mock server.
pub fn jwks_url(server: &MockServer) -> String {
    format!("{}{}", server.uri(), JWKS_PATH)
}
