//! Shared fixtures for key-ring and verifier tests: throwaway RSA key pairs,
//! JWKS documents derived from them, and token signing helpers.

use std::sync::OnceLock;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A generated RSA key pair in the shapes the tests need.
pub(crate) struct RsaKeyFixture {
    pub encoding_key: EncodingKey,
    pub n_b64: String,
    pub e_b64: String,
}

impl RsaKeyFixture {
    fn generate() -> Self {
        let private_key =
            RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).expect("generate RSA key");
        let public_key = private_key.to_public_key();
        let pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .expect("encode private key");

        Self {
            encoding_key: EncodingKey::from_rsa_pem(pem.as_bytes()).expect("load private key"),
            n_b64: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            e_b64: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        }
    }
}

/// The key pair most tests sign with and publish in their JWKS fixtures.
/// Generated once because RSA key generation is slow.
pub(crate) fn test_rsa_key() -> &'static RsaKeyFixture {
    static KEY: OnceLock<RsaKeyFixture> = OnceLock::new();
    KEY.get_or_init(RsaKeyFixture::generate)
}

/// A second key pair that is deliberately never published in any JWKS
/// fixture, for wrong-signer tests.
pub(crate) fn unpublished_rsa_key() -> &'static RsaKeyFixture {
    static KEY: OnceLock<RsaKeyFixture> = OnceLock::new();
    KEY.get_or_init(RsaKeyFixture::generate)
}

/// A JWKS document with a single RSA signing key under `kid`, backed by the
/// shared test key pair.
pub(crate) fn jwks_document(kid: &str) -> Value {
    let key = test_rsa_key();
    json!({
        "keys": [{
            "kty": "RSA",
            "use": "sig",
            "kid": kid,
            "alg": "RS256",
            "n": key.n_b64,
            "e": key.e_b64,
        }]
    })
}

/// Signs an RS256 token over `claims` with the shared test key pair.
pub(crate) fn sign_token(kid: Option<&str>, claims: &Value) -> String {
    sign_token_with(test_rsa_key(), kid, claims)
}

/// Signs an RS256 token with a specific key pair.
pub(crate) fn sign_token_with(key: &RsaKeyFixture, kid: Option<&str>, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(String::from);
    jsonwebtoken::encode(&header, claims, &key.encoding_key).expect("sign token")
}

/// Mounts `document` at the conventional JWKS path on `server`.
pub(crate) async fn mount_jwks(server: &MockServer, document: Value) {
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(document))
        .mount(server)
        .await;
}

/// The JWKS URL served by a mock server.
pub(crate) fn jwks_url(server: &MockServer) -> url::Url {
    url::Url::parse(&format!("{}/.well-known/jwks.json", server.uri())).expect("parse mock URL")
}
