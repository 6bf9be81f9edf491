//! Remote signing-key mirroring and token verification.
//!
//! When validating tokens issued by a remote identity provider, we need its
//! public keys to check signatures locally. This module provides:
//!
//! - [`KeyRing`] - Mirrors the provider's published JWKS and resolves key ids
//! - [`TokenVerifier`] - Verifies signed tokens against the ring and
//!   normalizes their payloads into [`Claims`](crate::types::Claims)
//!
//! The ring refreshes inline when a lookup finds the mirror stale or misses
//! a key id; there is no background refresh task. That inline refresh is what
//! makes provider key rotation transparent to callers: a token signed with a
//! freshly rotated key costs exactly one refetch on its first verification.

mod keyring;
mod verifier;

pub use keyring::{KeyRing, KeyRingConfig, SigningKey};
pub use verifier::{TokenVerifier, TokenVerifierConfig};

#[cfg(test)]
pub(crate) mod testutil;
