//! Crate-wide error types.
//!
//! Errors fall into the failure classes the caching layers care about:
//! transport failures (retrying on the next call may help), malformed remote
//! responses (surfaced, not auto-retried), verification failures (always a
//! rejection, never a silent allow), and backend failures surfaced on a cache
//! miss (the cache is left unchanged). [`IamError::category`] exposes the
//! classification so callers can pick a retry policy; this crate itself never
//! retries beyond the key ring's stale-key fallback and the token broker's
//! single coalesced exchange.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IamError>;

/// Errors produced by the IAM client components.
///
/// Variants carry plain message strings so errors stay `Clone`: a cloned
/// error is what every waiter of a coalesced token exchange receives.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IamError {
    /// A network error occurred while talking to a remote authority.
    #[error("network error: {0}")]
    Network(String),

    /// The remote endpoint returned a non-success status code.
    #[error("HTTP error: status {0}")]
    Http(u16),

    /// The remote response could not be parsed.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The fetched key set contained no usable signing keys.
    #[error("no usable signing keys in key set")]
    NoSigningKeys,

    /// No key matching the requested key id exists, even after a refresh.
    #[error("signing key not found: {0}")]
    KeyNotFound(String),

    /// The JWKS URL scheme is not allowed (must be HTTPS in production).
    #[error("invalid URL scheme: only HTTPS is allowed")]
    InvalidScheme,

    /// The token uses a signing algorithm the verifier refuses.
    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The token is malformed or its signature does not verify.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// The token's expiry claim is in the past.
    #[error("token expired")]
    TokenExpired,

    /// A required claim is absent from the token payload.
    #[error("missing required claim: {0}")]
    MissingClaim(&'static str),

    /// The injected authorization backend reported a failure.
    #[error("authorization backend error: {0}")]
    Backend(String),

    /// Subject or tenant was empty where both are required.
    #[error("subject and tenant are required")]
    MissingIdentity,

    /// A failure inside this crate's own plumbing, such as a panicked
    /// exchange task.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`IamError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unreachable or failing transport; the next call may succeed.
    Transport,
    /// The remote authority answered with something unusable.
    MalformedResponse,
    /// The presented token failed verification.
    Verification,
    /// The injected policy backend failed; the cache was left unchanged.
    Backend,
    /// The caller passed arguments the operation cannot work with.
    InvalidInput,
    /// A failure inside this crate's own plumbing.
    Internal,
}

impl IamError {
    /// Returns the failure class this error belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network(_) | Self::Http(_) => ErrorCategory::Transport,
            Self::MalformedResponse(_) | Self::NoSigningKeys => ErrorCategory::MalformedResponse,
            Self::KeyNotFound(_)
            | Self::UnsupportedAlgorithm(_)
            | Self::InvalidToken(_)
            | Self::TokenExpired
            | Self::MissingClaim(_) => ErrorCategory::Verification,
            Self::Backend(_) => ErrorCategory::Backend,
            Self::InvalidScheme | Self::MissingIdentity => ErrorCategory::InvalidInput,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for IamError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::TokenExpired,
            ErrorKind::MissingRequiredClaim(claim) if claim == "exp" => Self::MissingClaim("exp"),
            _ => Self::InvalidToken(err.to_string()),
        }
    }
}
