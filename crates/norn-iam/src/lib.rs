//! Client-side trust decisions for services behind a central IAM platform.
//!
//! Every service that accepts bearer tokens faces the same three costs: a
//! network hop to fetch signing keys, a network hop to ask "may this
//! subject do X", and a network hop to obtain its own service token. This
//! crate keeps all three answers warm locally:
//!
//! - [`jwks::KeyRing`] mirrors a remote JSON Web Key Set and serves signing
//!   keys by id, refreshing on staleness or unknown keys and falling back
//!   to the last good set when the endpoint is down.
//! - [`jwks::TokenVerifier`] validates signed bearer tokens against the
//!   ring and normalizes their claims, rejecting symmetric algorithms
//!   outright.
//! - [`authz::DecisionCache`] fronts an authorization backend with a TTL
//!   cache over yes/no permission decisions.
//! - [`oauth2::TokenBroker`] performs client-credentials exchanges and
//!   caches the resulting access token, coalescing concurrent requests
//!   onto a single exchange.
//!
//! Each piece is usable on its own; together they make token handling a
//! local operation on the hot path.

pub mod authz;
pub mod error;
pub mod jwks;
pub mod oauth2;
pub mod types;

pub use authz::{AuthzBackend, DecisionCache, DecisionCacheConfig};
pub use error::{ErrorCategory, IamError, Result};
pub use jwks::{KeyRing, KeyRingConfig, SigningKey, TokenVerifier, TokenVerifierConfig};
pub use oauth2::{OAuth2Token, TokenBroker, TokenBrokerConfig};
pub use types::{ClaimValue, Claims};
