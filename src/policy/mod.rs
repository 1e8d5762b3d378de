//! Token-embedded access policies.
//!
//! A signed access token carries a list of [`Policy`] statements. The proxy
//! never owns or persists them; it only reads them to turn
//! `(endpoint, HTTP method, resource path)` into an allow/deny decision.
//!
//! # Resolution
//!
//! ```text
//! HTTP method ──► Verb (read/create/update/delete) ──► 405 if none
//!   → first policy whose `endpoint` equals the target id   (no merge)
//!   → explicit `permissions[verb]` entry, else `scopes`      (deny-by-default)
//!   → PermissionSpec::{Denied, GrantedAny, GrantedPaths}
//!   → PathPattern match against the normalized resource path
//! ```
//!
//! # Modules
//!
//! - [`pattern`]: resource path normalization and pattern matching
//! - [`permission`]: raw permission entry / scope → [`PermissionSpec`]
//! - [`resolver`]: the decision itself ([`authorize`], [`evaluate`])

pub mod pattern;
pub mod permission;
pub mod resolver;

use std::fmt;

use axum::http::Method;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub use pattern::{PathPattern, has_dot_segment, normalize_path};
pub use permission::{GrantSource, PermissionSpec, ResolvedPermission, resolve_permission};
pub use resolver::{AuthorizationDecision, DecisionOutcome, MatchedPolicy, authorize, evaluate};

/// Permission verb derived from the HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    /// `GET`
    Read,
    /// `POST`
    Create,
    /// `PUT` / `PATCH`
    Update,
    /// `DELETE`
    Delete,
}

impl Verb {
    /// Map an HTTP method to its verb. Any other method has none.
    #[must_use]
    pub fn from_method(method: &Method) -> Option<Self> {
        match *method {
            Method::GET => Some(Self::Read),
            Method::POST => Some(Self::Create),
            Method::PUT | Method::PATCH => Some(Self::Update),
            Method::DELETE => Some(Self::Delete),
            _ => None,
        }
    }

    /// Key used in the token's `permissions` map and in scope strings.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One policy statement embedded in an access token.
///
/// `permissions` values stay raw JSON here: tokens in the wild carry
/// booleans, `"*"`, path lists and nested objects. They are normalized into
/// a [`PermissionSpec`] by [`resolve_permission`] and nowhere else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Target endpoint id (exact string match).
    #[serde(alias = "endpointId", alias = "endpoint_id")]
    pub endpoint: String,

    /// Verb → permission entry.
    #[serde(default, deserialize_with = "null_as_default")]
    pub permissions: Map<String, Value>,

    /// Compact grants: `endpoint:verb:resource`, `verb:resource` or `verb`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub scopes: Vec<String>,

    /// Policy-level resource list, consulted when a permission list is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,

    /// Alias of `resources` used by some token issuers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<Value>,
}

/// Treat an explicit JSON `null` like an absent field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
