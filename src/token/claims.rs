//! Access token claim schema.
//!
//! ```json
//! {
//!   "iss": "https://issuer.example", "aud": "armoriq-proxy",
//!   "sub": "agent-7", "exp": 1735689600, "iat": 1735686000,
//!   "policies": [
//!     {"endpoint": "svc", "permissions": {"read": ["/api/items/*"]}, "scopes": []}
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::policy::{Policy, null_as_default};

/// Identity used when no identifying claim is present.
pub const UNKNOWN_AGENT: &str = "unknown";

/// `aud` claim: a single string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// `"aud": "x"`
    One(String),
    /// `"aud": ["x", "y"]`
    Many(Vec<String>),
}

impl Audience {
    /// Comma-joined form for audit summaries.
    #[must_use]
    pub fn joined(&self) -> String {
        match self {
            Self::One(a) => a.clone(),
            Self::Many(list) => list.join(","),
        }
    }
}

/// Validated claims of a signed access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Audience
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    /// Subject (agent identity)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Expiry (Unix seconds)
    pub exp: u64,
    /// Issued-at (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Token id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// OAuth client id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Authorized party
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,
    /// Explicit agent id claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Embedded access policies
    #[serde(default, deserialize_with = "null_as_default")]
    pub policies: Vec<Policy>,
}

impl AccessTokenClaims {
    /// Agent identity: `sub`, then `client_id`, `azp`, `agent_id`, else
    /// [`UNKNOWN_AGENT`]. Blank values are skipped.
    #[must_use]
    pub fn agent_id(&self) -> &str {
        [&self.sub, &self.client_id, &self.azp, &self.agent_id]
            .into_iter()
            .filter_map(Option::as_deref)
            .find(|v| !v.trim().is_empty())
            .unwrap_or(UNKNOWN_AGENT)
    }
}
