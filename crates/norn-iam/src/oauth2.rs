//! Service-to-service token acquisition via the client-credentials grant.
//!
//! [`TokenBroker`] exchanges a client id and secret for an access token and
//! caches the result until shortly before it expires. Concurrent callers
//! that all find the cache empty are coalesced onto a single in-flight
//! exchange, so a cold start under load still costs one round trip to the
//! token endpoint.

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

use crate::error::{IamError, Result};

/// Configuration for a [`TokenBroker`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenBrokerConfig {
    /// Scopes requested when the caller passes none.
    pub default_scopes: Vec<String>,

    /// A cached token is treated as expired this long before its actual
    /// expiry (default: 5 minutes).
    #[serde(with = "humantime_serde")]
    pub refresh_buffer: Duration,

    /// Timeout for token endpoint requests (default: 10 seconds).
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for TokenBrokerConfig {
    fn default() -> Self {
        Self {
            default_scopes: Vec::new(),
            refresh_buffer: Duration::from_secs(300),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl TokenBrokerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the scopes used when the caller passes none.
    #[must_use]
    pub fn with_default_scopes(mut self, scopes: Vec<String>) -> Self {
        self.default_scopes = scopes;
        self
    }

    /// Sets the pre-expiry refresh buffer.
    #[must_use]
    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    /// Sets the token endpoint request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// An access token obtained from the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuth2Token {
    /// The bearer token itself.
    pub access_token: String,
    /// Token type as reported by the endpoint, normally `Bearer`.
    pub token_type: String,
    /// Lifetime in seconds as reported by the endpoint.
    pub expires_in: u64,
    /// Absolute expiry computed at receipt time.
    pub expires_at: OffsetDateTime,
    /// Granted scopes, when the endpoint reports them.
    pub scope: Option<String>,
}

/// Wire shape of a token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    expires_in: u64,
    #[serde(default)]
    scope: Option<String>,
}

type SharedExchange = Shared<BoxFuture<'static, Result<OAuth2Token>>>;

/// Exchanges client credentials for access tokens, with caching and
/// request coalescing.
pub struct TokenBroker {
    http_client: Client,
    token_url: Url,
    client_id: String,
    client_secret: String,
    config: TokenBrokerConfig,
    cached: Arc<tokio::sync::RwLock<Option<OAuth2Token>>>,
    inflight: tokio::sync::Mutex<Option<SharedExchange>>,
}

impl TokenBroker {
    /// Creates a broker for the given token endpoint and credentials.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be constructed.
    #[must_use]
    pub fn new(
        token_url: Url,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        config: TokenBrokerConfig,
    ) -> Self {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            token_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            config,
            cached: Arc::new(tokio::sync::RwLock::new(None)),
            inflight: tokio::sync::Mutex::new(None),
        }
    }

    /// Performs a client-credentials exchange, bypassing the cache.
    ///
    /// Empty `scopes` fall back to the configured default scopes.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-success status from the
    /// endpoint, or a response without a usable access token.
    pub async fn exchange_token(&self, scopes: &[String]) -> Result<OAuth2Token> {
        let scopes = if scopes.is_empty() {
            &self.config.default_scopes
        } else {
            scopes
        };
        exchange(
            &self.http_client,
            &self.token_url,
            &self.client_id,
            &self.client_secret,
            scopes,
        )
        .await
    }

    /// Returns a valid access token, exchanging credentials only when the
    /// cached one is absent or inside the refresh buffer.
    ///
    /// Concurrent callers racing on an empty or expiring cache share one
    /// exchange. The exchange itself runs on a detached task, so a caller
    /// that gives up waiting does not abort it for the others.
    ///
    /// # Errors
    ///
    /// Propagates the underlying exchange error to every waiting caller.
    /// The previously cached token, if any, is left untouched on failure.
    pub async fn get_cached_token(&self) -> Result<String> {
        if let Some(token) = self.fresh_cached_token().await {
            tracing::trace!("serving cached access token");
            return Ok(token.access_token);
        }

        let shared = self.join_or_start_exchange().await;
        let result = shared.clone().await;
        self.clear_finished_exchange(&shared).await;

        result.map(|token| token.access_token)
    }

    /// Drops the cached token so the next call performs a fresh exchange.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    async fn fresh_cached_token(&self) -> Option<OAuth2Token> {
        let guard = self.cached.read().await;
        let token = guard.as_ref()?;
        let deadline = token.expires_at - self.config.refresh_buffer;
        (OffsetDateTime::now_utc() < deadline).then(|| token.clone())
    }

    async fn join_or_start_exchange(&self) -> SharedExchange {
        let mut inflight = self.inflight.lock().await;

        // Join an exchange that is still running. A finished one left
        // behind by cancelled waiters is replaced, not reused.
        if let Some(existing) = inflight.as_ref()
            && existing.peek().is_none()
        {
            tracing::trace!("joining in-flight token exchange");
            return existing.clone();
        }

        tracing::debug!("starting token exchange");
        let http_client = self.http_client.clone();
        let token_url = self.token_url.clone();
        let client_id = self.client_id.clone();
        let client_secret = self.client_secret.clone();
        let scopes = self.config.default_scopes.clone();
        let cached = Arc::clone(&self.cached);

        let task = tokio::spawn(async move {
            let token =
                exchange(&http_client, &token_url, &client_id, &client_secret, &scopes).await?;
            *cached.write().await = Some(token.clone());
            Ok::<_, IamError>(token)
        });

        let shared: SharedExchange = async move {
            task.await
                .map_err(|e| IamError::Internal(format!("token exchange task failed: {e}")))?
        }
        .boxed()
        .shared();

        *inflight = Some(shared.clone());
        shared
    }

    async fn clear_finished_exchange(&self, shared: &SharedExchange) {
        let mut inflight = self.inflight.lock().await;
        if let Some(existing) = inflight.as_ref()
            && Shared::ptr_eq(existing, shared)
        {
            *inflight = None;
        }
    }
}

impl std::fmt::Debug for TokenBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBroker")
            .field("token_url", &self.token_url.as_str())
            .field("client_id", &self.client_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Posts a client-credentials grant to the token endpoint.
async fn exchange(
    http_client: &Client,
    token_url: &Url,
    client_id: &str,
    client_secret: &str,
    scopes: &[String],
) -> Result<OAuth2Token> {
    let mut form: Vec<(&str, String)> = vec![
        ("grant_type", "client_credentials".to_string()),
        ("client_id", client_id.to_string()),
        ("client_secret", client_secret.to_string()),
    ];
    if !scopes.is_empty() {
        form.push(("scope", scopes.join(" ")));
    }

    let response = http_client
        .post(token_url.clone())
        .form(&form)
        .send()
        .await
        .map_err(|e| IamError::Network(format!("token exchange failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        tracing::warn!(status = status.as_u16(), "token endpoint returned an error");
        return Err(IamError::Http(status.as_u16()));
    }

    let body: TokenResponse = response
        .json()
        .await
        .map_err(|e| IamError::MalformedResponse(format!("invalid token response: {e}")))?;

    if body.access_token.is_empty() {
        return Err(IamError::MalformedResponse(
            "empty access_token in response".to_string(),
        ));
    }

    tracing::debug!(expires_in = body.expires_in, "token exchange succeeded");

    Ok(OAuth2Token {
        expires_at: OffsetDateTime::now_utc() + Duration::from_secs(body.expires_in),
        access_token: body.access_token,
        token_type: body.token_type,
        expires_in: body.expires_in,
        scope: body.scope,
    })
}
