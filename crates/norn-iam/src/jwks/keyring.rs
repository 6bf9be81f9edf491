//! Remote JWKS fetching and caching.
//!
//! [`KeyRing`] maintains a local mirror of an identity provider's published
//! key set so token signatures can be checked without a network round-trip
//! per request. The mirror is a single immutable snapshot replaced wholesale
//! on every successful fetch; readers never observe a half-updated key set.
//!
//! # Example
//!
//! ```ignore
//! use norn_iam::jwks::{KeyRing, KeyRingConfig};
//! use url::Url;
//!
//! let jwks_url = Url::parse("https://auth.example.com/.well-known/jwks.json")?;
//! let ring = KeyRing::new(jwks_url, KeyRingConfig::default());
//!
//! // Resolve a specific key by kid; fetches at most once.
//! let key = ring.resolve(Some("key-1")).await?;
//! ```
//!
//! # Security Considerations
//!
//! - Only HTTPS endpoints are allowed (configurable for testing)
//! - Symmetric and encryption-use key entries are never mirrored
//! - A fetch yielding zero usable keys never replaces a good snapshot

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{IamError, Result};

/// Configuration for a [`KeyRing`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KeyRingConfig {
    /// How long a fetched key set stays fresh (default: 1 hour).
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,

    /// HTTP request timeout (default: 10 seconds).
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Whether to allow HTTP (non-HTTPS) JWKS endpoints.
    /// This should only be enabled for testing.
    pub allow_http: bool,
}

impl Default for KeyRingConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(3600), // 1 hour
            request_timeout: Duration::from_secs(10),    // 10 seconds
            allow_http: false,
        }
    }
}

impl KeyRingConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long a fetched key set stays fresh.
    #[must_use]
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Allows HTTP (non-HTTPS) JWKS endpoints.
    ///
    /// # Warning
    ///
    /// This should only be used for testing. In production, JWKS endpoints
    /// should always use HTTPS.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }
}

/// A single verification key mirrored from the remote key set.
///
/// Immutable once fetched; cloning is cheap and hands the caller its own
/// copy, detached from any snapshot lifetime.
#[derive(Clone)]
pub struct SigningKey {
    /// The `kid` the provider published for this key, if any.
    pub key_id: Option<String>,

    /// The algorithm the provider declared for this key, if any.
    pub algorithm: Option<Algorithm>,

    decoding_key: DecodingKey,
}

impl SigningKey {
    /// The decoded verification key.
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// One immutable key-set snapshot.
struct KeySet {
    /// Keys in document order; the first entry is the no-kid fallback.
    keys: Vec<SigningKey>,
    /// When this snapshot was fetched; `None` before the first fetch.
    fetched_at: Option<Instant>,
}

impl KeySet {
    fn empty() -> Self {
        Self {
            keys: Vec::new(),
            fetched_at: None,
        }
    }

    fn is_fresh(&self, refresh_interval: Duration) -> bool {
        self.fetched_at
            .is_some_and(|fetched| fetched.elapsed() < refresh_interval)
    }

    fn find(&self, key_id: Option<&str>) -> Option<&SigningKey> {
        match key_id {
            Some(kid) if !kid.is_empty() => {
                self.keys.iter().find(|k| k.key_id.as_deref() == Some(kid))
            }
            // No hint: only sound when the provider keeps a single active
            // signing key. See `KeyRing::resolve`.
            _ => self.keys.first(),
        }
    }
}

/// Local mirror of a remote JWKS document.
///
/// # Features
///
/// - Key lookup by `kid` with automatic refetch on miss or staleness
/// - Atomic wholesale snapshot replacement (no torn reads)
/// - Stale-key fallback when the endpoint is unreachable
/// - Manual invalidation
///
/// Concurrent refreshes resolve last-writer-wins; no stronger ordering is
/// guaranteed.
pub struct KeyRing {
    /// HTTP client for fetching the key set.
    http_client: reqwest::Client,
    /// The JWKS endpoint.
    jwks_url: Url,
    /// Current snapshot, replaced wholesale on refresh.
    snapshot: ArcSwap<KeySet>,
    /// Configuration.
    config: KeyRingConfig,
}

impl KeyRing {
    /// Creates a new key ring for the given JWKS endpoint.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created (should not happen in
    /// practice).
    #[must_use]
    pub fn new(jwks_url: Url, config: KeyRingConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            jwks_url,
            snapshot: ArcSwap::from_pointee(KeySet::empty()),
            config,
        }
    }

    /// Resolves a key id to its verification key.
    ///
    /// A fresh snapshot that holds the key answers with no network access.
    /// A stale snapshot or an unknown key id triggers exactly one blocking
    /// [`refresh`](Self::refresh) before the lookup is retried. If the
    /// refresh fails but a stale key satisfies the request, the stale key is
    /// returned: a key that verified signatures an hour ago still verifies
    /// them now. The call fails only when no key, fresh or stale, matches.
    ///
    /// `None` (or an empty string) selects the first key in document order.
    /// That fallback is only correct when the provider keeps a single active
    /// signing key; providers that rotate with overlap must put a `kid` in
    /// their token headers.
    ///
    /// # Errors
    ///
    /// Returns an error if the key id is unknown after a refresh, or if the
    /// fetch fails and no stale key matches.
    pub async fn resolve(&self, key_id: Option<&str>) -> Result<SigningKey> {
        {
            let snapshot = self.snapshot.load();
            if snapshot.is_fresh(self.config.refresh_interval)
                && let Some(key) = snapshot.find(key_id)
            {
                tracing::trace!(kid = key_id.unwrap_or("<none>"), "key ring cache hit");
                return Ok(key.clone());
            }
        }

        match self.refresh().await {
            Ok(()) => {
                let snapshot = self.snapshot.load();
                snapshot
                    .find(key_id)
                    .cloned()
                    .ok_or_else(|| IamError::KeyNotFound(key_id.unwrap_or("<none>").to_string()))
            }
            Err(err) => {
                // Availability over freshness: serve a stale key rather than
                // fail closed on a transient fetch error.
                let snapshot = self.snapshot.load();
                if let Some(key) = snapshot.find(key_id) {
                    tracing::warn!(error = %err, "key set refresh failed, serving stale key");
                    return Ok(key.clone());
                }
                Err(err)
            }
        }
    }

    /// Fetches the JWKS document and replaces the snapshot atomically.
    ///
    /// Always fetches, regardless of snapshot age. Entries that cannot back
    /// signature verification (encryption-use keys, symmetric keys, keys
    /// whose material does not decode) are skipped, not fatal.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL scheme is not allowed, the request fails,
    /// the response is not 2xx, the body does not parse, or the document
    /// contains zero usable keys. On error the previous snapshot is left in
    /// place, so a misbehaving endpoint cannot silently disable verification.
    pub async fn refresh(&self) -> Result<()> {
        self.validate_scheme()?;

        tracing::debug!(url = %self.jwks_url, "fetching JWKS");

        let response = self
            .http_client
            .get(self.jwks_url.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(url = %self.jwks_url, error = %e, "failed to fetch JWKS");
                IamError::Network(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(IamError::Http(response.status().as_u16()));
        }

        let jwk_set: JwkSet = response.json().await.map_err(|e| {
            tracing::warn!(url = %self.jwks_url, error = %e, "failed to parse JWKS");
            IamError::MalformedResponse(e.to_string())
        })?;

        let total = jwk_set.keys.len();
        let keys: Vec<SigningKey> = jwk_set.keys.iter().filter_map(signing_key_from_jwk).collect();

        if keys.is_empty() {
            // An empty-but-valid snapshot would silently disable
            // verification; keep the previous one and surface the problem.
            return Err(IamError::NoSigningKeys);
        }

        tracing::debug!(
            usable = keys.len(),
            skipped = total - keys.len(),
            "key set snapshot replaced"
        );

        self.snapshot.store(Arc::new(KeySet {
            keys,
            fetched_at: Some(Instant::now()),
        }));

        Ok(())
    }

    /// Drops the current snapshot, forcing the next lookup to fetch.
    pub fn invalidate(&self) {
        self.snapshot.store(Arc::new(KeySet::empty()));
        tracing::debug!("key ring invalidated");
    }

    /// Returns the number of usable keys in the current snapshot.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.snapshot.load().keys.len()
    }

    /// Validates that the endpoint uses an allowed scheme.
    fn validate_scheme(&self) -> Result<()> {
        let scheme = self.jwks_url.scheme();

        if scheme == "https" {
            return Ok(());
        }

        if scheme == "http" && self.config.allow_http {
            return Ok(());
        }

        Err(IamError::InvalidScheme)
    }
}

/// Converts a JWK entry into a [`SigningKey`].
///
/// Returns `None` for entries that must not be mirrored: encryption-use
/// keys, symmetric keys (which would invite algorithm confusion), and keys
/// whose material does not decode.
fn signing_key_from_jwk(jwk: &Jwk) -> Option<SigningKey> {
    if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
        return None;
    }

    if matches!(jwk.algorithm, AlgorithmParameters::OctetKey(_)) {
        return None;
    }

    let decoding_key = DecodingKey::from_jwk(jwk).ok()?;

    Some(SigningKey {
        key_id: jwk.common.key_id.clone(),
        algorithm: jwk_algorithm(jwk),
        decoding_key,
    })
}

/// Extracts the declared signing algorithm from a JWK.
fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    jwk.common.key_algorithm.as_ref().and_then(|alg| match alg {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwks::testutil::{jwks_document, jwks_url, mount_jwks, test_rsa_key};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> KeyRingConfig {
        KeyRingConfig::default().with_allow_http(true)
    }

    async fn request_count(server: &MockServer) -> usize {
        server.received_requests().await.unwrap_or_default().len()
    }

    #[test]
    fn test_config_defaults() {
        let config = KeyRingConfig::default();
        assert_eq!(config.refresh_interval, Duration::from_secs(3600));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(!config.allow_http);
    }

    #[test]
    fn test_config_builder() {
        let config = KeyRingConfig::new()
            .with_refresh_interval(Duration::from_secs(600))
            .with_request_timeout(Duration::from_secs(5))
            .with_allow_http(true);

        assert_eq!(config.refresh_interval, Duration::from_secs(600));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert!(config.allow_http);
    }

    #[test]
    fn test_config_deserializes_humantime_durations() {
        let config: KeyRingConfig =
            serde_json::from_str(r#"{"refresh_interval": "30m"}"#).unwrap();
        assert_eq!(config.refresh_interval, Duration::from_secs(1800));
        // Unset fields keep their defaults.
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_https_required_by_default() {
        let url = Url::parse("http://example.com/jwks").unwrap();
        let ring = KeyRing::new(url, KeyRingConfig::default());
        assert!(matches!(
            ring.validate_scheme(),
            Err(IamError::InvalidScheme)
        ));

        let url = Url::parse("https://example.com/jwks").unwrap();
        let ring = KeyRing::new(url, KeyRingConfig::default());
        assert!(ring.validate_scheme().is_ok());
    }

    #[tokio::test]
    async fn test_resolve_known_kid_hits_cache() {
        let server = MockServer::start().await;
        mount_jwks(&server, jwks_document("key-1")).await;

        let ring = KeyRing::new(jwks_url(&server), test_config());

        let key = ring.resolve(Some("key-1")).await.unwrap();
        assert_eq!(key.key_id.as_deref(), Some("key-1"));
        assert_eq!(key.algorithm, Some(Algorithm::RS256));

        // Second resolve within the refresh interval: no network access.
        let _ = ring.resolve(Some("key-1")).await.unwrap();
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_resolve_without_kid_returns_first_key() {
        let server = MockServer::start().await;
        mount_jwks(&server, jwks_document("the-key")).await;

        let ring = KeyRing::new(jwks_url(&server), test_config());

        let key = ring.resolve(None).await.unwrap();
        assert_eq!(key.key_id.as_deref(), Some("the-key"));

        let key = ring.resolve(Some("")).await.unwrap();
        assert_eq!(key.key_id.as_deref(), Some("the-key"));

        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_stale_snapshot_triggers_refetch() {
        let server = MockServer::start().await;
        mount_jwks(&server, jwks_document("key-1")).await;

        let config = test_config().with_refresh_interval(Duration::from_millis(50));
        let ring = KeyRing::new(jwks_url(&server), config);

        let _ = ring.resolve(Some("key-1")).await.unwrap();
        assert_eq!(request_count(&server).await, 1);

        tokio::time::sleep(Duration::from_millis(80)).await;

        let _ = ring.resolve(Some("key-1")).await.unwrap();
        assert_eq!(request_count(&server).await, 2);
    }

    #[tokio::test]
    async fn test_unknown_kid_refreshes_once_then_fails() {
        let server = MockServer::start().await;
        mount_jwks(&server, jwks_document("key-1")).await;

        let ring = KeyRing::new(jwks_url(&server), test_config());
        let _ = ring.resolve(Some("key-1")).await.unwrap();

        let err = ring.resolve(Some("key-2")).await.unwrap_err();
        assert!(matches!(err, IamError::KeyNotFound(kid) if kid == "key-2"));

        // Initial fetch plus exactly one refresh for the unknown kid.
        assert_eq!(request_count(&server).await, 2);
    }

    #[tokio::test]
    async fn test_rotated_key_found_after_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document("key-1")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_jwks(&server, jwks_document("key-2")).await;

        let ring = KeyRing::new(jwks_url(&server), test_config());
        let _ = ring.resolve(Some("key-1")).await.unwrap();

        // The provider rotated; the unknown kid costs one refetch.
        let key = ring.resolve(Some("key-2")).await.unwrap();
        assert_eq!(key.key_id.as_deref(), Some("key-2"));
        assert_eq!(request_count(&server).await, 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_stale_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document("key-1")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_jwks_status(&server, 500).await;

        // Zero interval: every resolve considers the snapshot stale.
        let config = test_config().with_refresh_interval(Duration::ZERO);
        let ring = KeyRing::new(jwks_url(&server), config);

        let _ = ring.resolve(Some("key-1")).await.unwrap();

        // Endpoint now failing; the stale key is still served.
        let key = ring.resolve(Some("key-1")).await.unwrap();
        assert_eq!(key.key_id.as_deref(), Some("key-1"));
    }

    #[tokio::test]
    async fn test_failed_refresh_without_stale_key_is_an_error() {
        let server = MockServer::start().await;
        mount_jwks_status(&server, 500).await;

        let ring = KeyRing::new(jwks_url(&server), test_config());
        let err = ring.resolve(Some("key-1")).await.unwrap_err();
        assert!(matches!(err, IamError::Http(500)));
    }

    #[tokio::test]
    async fn test_zero_usable_keys_is_an_error() {
        let server = MockServer::start().await;
        mount_jwks(&server, json!({ "keys": [] })).await;

        let ring = KeyRing::new(jwks_url(&server), test_config());
        let err = ring.refresh().await.unwrap_err();
        assert!(matches!(err, IamError::NoSigningKeys));
        assert_eq!(ring.key_count(), 0);
    }

    #[tokio::test]
    async fn test_unusable_entries_skipped_not_fatal() {
        let key = test_rsa_key();
        let server = MockServer::start().await;
        mount_jwks(
            &server,
            json!({
                "keys": [
                    // Symmetric key: never mirrored.
                    { "kty": "oct", "kid": "hmac-key", "k": "c2VjcmV0" },
                    // Encryption key: skipped.
                    {
                        "kty": "RSA", "use": "enc", "kid": "enc-key",
                        "alg": "RSA-OAEP", "n": key.n_b64, "e": key.e_b64
                    },
                    {
                        "kty": "RSA", "use": "sig", "kid": "sig-key",
                        "alg": "RS256", "n": key.n_b64, "e": key.e_b64
                    },
                ]
            }),
        )
        .await;

        let ring = KeyRing::new(jwks_url(&server), test_config());
        ring.refresh().await.unwrap();

        assert_eq!(ring.key_count(), 1);
        let resolved = ring.resolve(Some("sig-key")).await.unwrap();
        assert_eq!(resolved.key_id.as_deref(), Some("sig-key"));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let server = MockServer::start().await;
        mount_jwks(&server, jwks_document("key-1")).await;

        let ring = KeyRing::new(jwks_url(&server), test_config());
        let _ = ring.resolve(Some("key-1")).await.unwrap();
        assert_eq!(ring.key_count(), 1);

        ring.invalidate();
        assert_eq!(ring.key_count(), 0);

        let _ = ring.resolve(Some("key-1")).await.unwrap();
        assert_eq!(request_count(&server).await, 2);
    }

    async fn mount_jwks_status(server: &MockServer, status: u16) {
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(status))
            .mount(server)
            .await;
    }
}
