//! Signed-token verification against a [`KeyRing`].
//!
//! [`TokenVerifier`] turns a compact signed token into a verified
//! [`Claims`] value. Verification is all-or-nothing: claims are only
//! produced after the signature and expiry checks have passed against a key
//! resolved from the ring, and no partial result is ever returned.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use norn_iam::jwks::{KeyRing, KeyRingConfig, TokenVerifier, TokenVerifierConfig};
//! use url::Url;
//!
//! let jwks_url = Url::parse("https://auth.example.com/.well-known/jwks.json")?;
//! let ring = Arc::new(KeyRing::new(jwks_url, KeyRingConfig::default()));
//! let verifier = TokenVerifier::new(ring, TokenVerifierConfig::default());
//!
//! let claims = verifier.verify(bearer_token).await?;
//! println!("subject: {}", claims.subject);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::{IamError, Result};
use crate::jwks::KeyRing;
use crate::types::{ClaimValue, Claims};

/// Claim names that map onto typed [`Claims`] fields or are consumed by
/// validation, and are therefore excluded from `Claims::extra`.
const REGISTERED_CLAIMS: &[&str] = &[
    "sub", "tenant_id", "email", "iss", "roles", "exp", "iat", "aud", "nbf", "jti",
];

/// Configuration for a [`TokenVerifier`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenVerifierConfig {
    /// Clock skew tolerated when validating `exp` (default: 30 seconds).
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
}

impl Default for TokenVerifierConfig {
    fn default() -> Self {
        Self {
            clock_skew: Duration::from_secs(30),
        }
    }
}

impl TokenVerifierConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the tolerated clock skew.
    #[must_use]
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }
}

/// Verifies signed bearer tokens and normalizes their payloads.
pub struct TokenVerifier {
    keyring: Arc<KeyRing>,
    config: TokenVerifierConfig,
}

impl TokenVerifier {
    /// Creates a verifier backed by the given key ring.
    #[must_use]
    pub fn new(keyring: Arc<KeyRing>, config: TokenVerifierConfig) -> Self {
        Self { keyring, config }
    }

    /// Verifies `token` and returns its claims.
    ///
    /// Accepts the raw compact form or an `Authorization` header value with
    /// a `Bearer ` prefix. Symmetric algorithms are rejected before any key
    /// lookup, so a forged HS256 token never reaches signature verification
    /// even if a matching secret happens to exist somewhere. An unknown key
    /// id costs exactly one key-set refresh before the token is rejected,
    /// which is what makes provider key rotation transparent to callers.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, uses a disallowed
    /// algorithm, its key cannot be resolved, the signature does not verify,
    /// or the `exp` claim is absent or in the past.
    pub async fn verify(&self, token: &str) -> Result<Claims> {
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();

        let header = decode_header(token).map_err(|e| IamError::InvalidToken(e.to_string()))?;

        if !is_asymmetric(header.alg) {
            return Err(IamError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        let key = self.keyring.resolve(header.kid.as_deref()).await?;

        // Prefer the algorithm the key set declares for this key; a header
        // that disagrees fails signature validation below.
        let algorithm = key.algorithm.unwrap_or(header.alg);
        if !is_asymmetric(algorithm) {
            return Err(IamError::UnsupportedAlgorithm(format!("{algorithm:?}")));
        }

        let mut validation = Validation::new(algorithm);
        validation.validate_aud = false; // No audience pinned at this layer.
        validation.leeway = self.config.clock_skew.as_secs();
        validation.set_required_spec_claims(&["exp"]);

        let data = decode::<HashMap<String, Value>>(token, key.decoding_key(), &validation)?;

        tracing::trace!(kid = header.kid.as_deref().unwrap_or("<none>"), "token verified");

        claims_from_payload(data.claims)
    }
}

/// Maps a verified raw payload into [`Claims`].
///
/// Standard fields are lifted into typed fields; everything not on the
/// registered list lands in `extra`, so no claim is silently dropped.
fn claims_from_payload(mut payload: HashMap<String, Value>) -> Result<Claims> {
    let expires_at = payload
        .get("exp")
        .and_then(unix_seconds)
        .ok_or(IamError::MissingClaim("exp"))
        .and_then(|secs| {
            OffsetDateTime::from_unix_timestamp(secs)
                .map_err(|e| IamError::InvalidToken(format!("bad exp claim: {e}")))
        })?;

    let issued_at = payload
        .get("iat")
        .and_then(unix_seconds)
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok());

    let subject = string_claim(&payload, "sub");
    let tenant_id = string_claim(&payload, "tenant_id");
    let issuer = string_claim(&payload, "iss");
    let email = payload
        .get("email")
        .and_then(Value::as_str)
        .map(String::from);
    let roles = roles_claim(payload.get("roles"));

    payload.retain(|name, _| !REGISTERED_CLAIMS.contains(&name.as_str()));
    let extra = payload
        .into_iter()
        .map(|(name, value)| (name, ClaimValue::from(value)))
        .collect();

    Ok(Claims {
        subject,
        tenant_id,
        email,
        roles,
        issuer,
        issued_at,
        expires_at,
        extra,
    })
}

fn string_claim(payload: &HashMap<String, Value>, name: &str) -> String {
    payload
        .get(name)
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_default()
}

/// Coerces a `roles` claim into a string list.
///
/// Accepts a JSON string array; some providers emit a comma-separated
/// string instead, so that shape is accepted too.
fn roles_claim(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        Some(Value::String(joined)) => joined
            .split(',')
            .map(|role| role.trim().to_string())
            .filter(|role| !role.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// Reads a numeric timestamp claim, tolerating issuers that emit floats.
fn unix_seconds(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|secs| secs as i64))
}

fn is_asymmetric(alg: Algorithm) -> bool {
    !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}
