//! Verified claims and claim values.

use std::collections::HashMap;

use serde_json::Value;
use time::OffsetDateTime;

/// The verified payload of a signed token.
///
/// Standard fields are strongly typed; everything else the issuer put into
/// the payload is preserved in [`extra`](Self::extra) so no claim is silently
/// dropped. A `Claims` value is only ever produced after signature and expiry
/// checks have passed, and is immutable thereafter.
#[derive(Debug, Clone, PartialEq)]
pub struct Claims {
    /// The `sub` claim: the authenticated principal.
    pub subject: String,

    /// The `tenant_id` claim.
    pub tenant_id: String,

    /// The `email` claim, when present.
    pub email: Option<String>,

    /// The `roles` claim.
    pub roles: Vec<String>,

    /// The `iss` claim.
    pub issuer: String,

    /// The `iat` claim, when present.
    pub issued_at: Option<OffsetDateTime>,

    /// The `exp` claim. Always present: tokens without an expiry are
    /// rejected during verification.
    pub expires_at: OffsetDateTime,

    /// Non-registered claims, keyed by claim name.
    pub extra: HashMap<String, ClaimValue>,
}

/// A single non-registered claim value.
///
/// Issuers put arbitrary JSON into token payloads. The variants cover the
/// shapes that matter for access decisions (strings, numbers, string lists)
/// without losing anything else: [`Other`](Self::Other) keeps the raw JSON
/// verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimValue {
    /// A JSON string.
    String(String),
    /// A JSON number.
    Number(f64),
    /// A JSON array of strings.
    StringList(Vec<String>),
    /// Any other JSON shape, kept verbatim.
    Other(Value),
}

impl ClaimValue {
    /// Returns the string value, if this is a [`ClaimValue::String`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the numeric value, if this is a [`ClaimValue::Number`].
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string list, if this is a [`ClaimValue::StringList`].
    #[must_use]
    pub fn as_string_list(&self) -> Option<&[String]> {
        match self {
            Self::StringList(items) => Some(items),
            _ => None,
        }
    }
}

impl From<Value> for ClaimValue {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => Self::String(s),
            Value::Number(n) => match n.as_f64() {
                Some(f) => Self::Number(f),
                None => Self::Other(Value::Number(n)),
            },
            Value::Array(items) => {
                if items.iter().all(Value::is_string) {
                    Self::StringList(
                        items
                            .into_iter()
                            .filter_map(|item| match item {
                                Value::String(s) => Some(s),
                                _ => None,
                            })
                            .collect(),
                    )
                } else {
                    Self::Other(Value::Array(items))
                }
            }
            other => Self::Other(other),
        }
    }
}
