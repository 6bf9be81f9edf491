//! Authorization decisions with TTL caching.
//!
//! [`DecisionCache`] fronts an [`AuthzBackend`] (typically a remote
//! authorization service) and memoizes yes/no permission decisions for a
//! bounded time window. Both grants and denials are cached, so a burst of
//! identical checks costs one backend round trip. Permission listings are
//! deliberately never cached: callers that enumerate permissions want the
//! current set, not a snapshot.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{IamError, Result};

/// Source of authorization decisions fronted by a [`DecisionCache`].
#[async_trait]
pub trait AuthzBackend: Send + Sync {
    /// Returns every permission the subject holds within the tenant.
    async fn get_permissions(&self, subject: &str, tenant: &str) -> Result<Vec<String>>;

    /// Returns whether the subject holds the given permission within the
    /// tenant.
    async fn check_permission(&self, subject: &str, tenant: &str, permission: &str)
    -> Result<bool>;
}

/// Configuration for a [`DecisionCache`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DecisionCacheConfig {
    /// How long a cached decision stays valid (default: 5 minutes).
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for DecisionCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
        }
    }
}

impl DecisionCacheConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the decision time-to-live.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DecisionKey {
    subject: String,
    tenant: String,
    permission: String,
}

#[derive(Debug, Clone)]
struct DecisionEntry {
    allowed: bool,
    cached_at: Instant,
}

/// TTL cache over an [`AuthzBackend`].
pub struct DecisionCache {
    backend: Arc<dyn AuthzBackend>,
    config: DecisionCacheConfig,
    cache: DashMap<DecisionKey, DecisionEntry>,
}

impl DecisionCache {
    /// Creates a cache over the given backend.
    #[must_use]
    pub fn new(backend: Arc<dyn AuthzBackend>, config: DecisionCacheConfig) -> Self {
        Self {
            backend,
            config,
            cache: DashMap::new(),
        }
    }

    /// Checks whether the subject holds `permission` within the tenant.
    ///
    /// A decision cached within the TTL window is returned without touching
    /// the backend. On a miss the backend is consulted and its answer,
    /// allow or deny, is cached. Backend failures are propagated and never
    /// cached, so a flaky backend does not pin stale denials.
    ///
    /// # Errors
    ///
    /// Returns [`IamError::MissingIdentity`] when `subject` or `tenant` is
    /// empty, or the backend's error on a failed lookup.
    pub async fn check(&self, subject: &str, tenant: &str, permission: &str) -> Result<bool> {
        if subject.is_empty() || tenant.is_empty() {
            return Err(IamError::MissingIdentity);
        }

        let key = DecisionKey {
            subject: subject.to_string(),
            tenant: tenant.to_string(),
            permission: permission.to_string(),
        };

        if let Some(entry) = self.cache.get(&key) {
            if entry.cached_at.elapsed() < self.config.ttl {
                tracing::trace!(subject, tenant, permission, "authz cache hit");
                return Ok(entry.allowed);
            }
            // Expired; release the shard lock before removing.
            drop(entry);
            self.cache.remove(&key);
        }

        let allowed = self
            .backend
            .check_permission(subject, tenant, permission)
            .await?;

        tracing::debug!(subject, tenant, permission, allowed, "authz decision cached");
        self.cache.insert(
            key,
            DecisionEntry {
                allowed,
                cached_at: Instant::now(),
            },
        );

        Ok(allowed)
    }

    /// Checks a permission expressed as a resource/action pair.
    ///
    /// The pair is flattened to the `resource:action` form, so it shares
    /// cache entries with equivalent [`check`](Self::check) calls.
    pub async fn check_resource(
        &self,
        subject: &str,
        tenant: &str,
        resource: &str,
        action: &str,
    ) -> Result<bool> {
        let permission = format!("{resource}:{action}");
        self.check(subject, tenant, &permission).await
    }

    /// Returns every permission the subject holds within the tenant.
    ///
    /// Always consults the backend; listings are not cached.
    pub async fn get_permissions(&self, subject: &str, tenant: &str) -> Result<Vec<String>> {
        if subject.is_empty() || tenant.is_empty() {
            return Err(IamError::MissingIdentity);
        }
        self.backend.get_permissions(subject, tenant).await
    }

    /// Drops every cached decision.
    ///
    /// Call after a role or policy change to force fresh decisions.
    pub fn clear_cache(&self) {
        self.cache.clear();
        tracing::debug!("authz decision cache cleared");
    }

    /// Number of cached decisions, expired entries included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Returns `true` when no decisions are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl std::fmt::Debug for DecisionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionCache")
            .field("config", &self.config)
            .field("entries", &self.cache.len())
            .finish_non_exhaustive()
    }
}
