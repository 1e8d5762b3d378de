//! Signed access token verification.
//!
//! The verifier is built once at startup in one of three modes:
//!
//! | Mode           | Material                        | Key selection      |
//! |----------------|---------------------------------|--------------------|
//! | `public_key`   | one PEM key + algorithm         | always that key    |
//! | `jwks`         | JWKS file or URL                | header `kid`       |
//! | `unconfigured` | none                            | every request: 503 |
//!
//! Checks run in order: signature, `exp` (with clock tolerance), `iss` when
//! configured, `aud` when configured. Failure detail is kept in the
//! [`ProxyError::InvalidToken`] reason for the audit trail.

pub mod claims;
pub mod keys;

use std::fmt;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{TokenData, Validation};
use tracing::debug;

pub use claims::{AccessTokenClaims, Audience, UNKNOWN_AGENT};
pub use keys::{KeyFamily, KeySource};

use crate::Result;
use crate::config::TokenConfig;
use crate::error::ProxyError;

/// Which verification backend is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierMode {
    /// Single public key
    PublicKey,
    /// JWKS key set
    KeySet,
    /// No key material; fail closed
    Unconfigured,
}

impl VerifierMode {
    /// Label reported by `/health`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PublicKey => "public_key",
            Self::KeySet => "jwks",
            Self::Unconfigured => "unconfigured",
        }
    }
}

/// Output of a successful verification.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    /// Validated claims
    pub claims: AccessTokenClaims,
    /// Derived agent identity
    pub agent_id: String,
    /// `kid` of the key that verified the token (key-set mode)
    pub key_id: Option<String>,
}

/// Verifies access tokens against the startup key material.
pub struct TokenVerifier {
    source: Option<KeySource>,
    issuer: Option<String>,
    audience: Option<String>,
    leeway: u64,
}

impl fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("mode", &self.mode())
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("leeway", &self.leeway)
            .finish()
    }
}

impl TokenVerifier {
    /// Build from configuration, loading key material.
    ///
    /// # Errors
    ///
    /// Returns an error when configured key material is unreadable; the
    /// absence of any material is not an error.
    pub async fn from_config(config: &TokenConfig) -> Result<Self> {
        let source = KeySource::from_config(config).await?;
        Ok(Self::new(source, config))
    }

    /// Build around already loaded material.
    #[must_use]
    pub fn new(source: Option<KeySource>, config: &TokenConfig) -> Self {
        let non_blank = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        Self {
            source,
            issuer: non_blank(&config.issuer),
            audience: non_blank(&config.audience),
            leeway: config.clock_tolerance,
        }
    }

    /// A verifier that rejects everything with 503.
    #[must_use]
    pub fn unconfigured() -> Self {
        Self::new(None, &TokenConfig::default())
    }

    /// Active backend.
    #[must_use]
    pub fn mode(&self) -> VerifierMode {
        match self.source {
            Some(KeySource::PublicKey { .. }) => VerifierMode::PublicKey,
            Some(KeySource::KeySet(_)) => VerifierMode::KeySet,
            None => VerifierMode::Unconfigured,
        }
    }

    /// Whether key material is loaded.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.source.is_some()
    }

    /// Verify `token` and extract its claims.
    ///
    /// # Errors
    ///
    /// [`ProxyError::VerifierUnavailable`] without key material, otherwise
    /// [`ProxyError::InvalidToken`] with the failing check as reason.
    pub fn verify(&self, token: &str) -> std::result::Result<VerifiedToken, ProxyError> {
        let source = self.source.as_ref().ok_or(ProxyError::VerifierUnavailable)?;

        let header = jsonwebtoken::decode_header(token).map_err(|e| invalid(&e))?;

        let (key, algorithm, key_id) = match source {
            KeySource::PublicKey { key, algorithm } => (key, *algorithm, None),
            KeySource::KeySet(keys) => {
                let kid = header
                    .kid
                    .as_deref()
                    .ok_or_else(|| invalid_reason("token header has no key id"))?;
                let entry = keys
                    .get(kid)
                    .ok_or_else(|| invalid_reason(format!("unknown key id '{kid}'")))?;
                if KeyFamily::of(header.alg) != Some(entry.family) {
                    return Err(invalid_reason(format!(
                        "algorithm {:?} does not match key '{kid}'",
                        header.alg
                    )));
                }
                (&entry.key, header.alg, Some(kid.to_string()))
            }
        };

        let validation = self.validation(algorithm);
        let data: TokenData<AccessTokenClaims> =
            jsonwebtoken::decode(token, key, &validation).map_err(|e| invalid(&e))?;

        let claims = data.claims;
        let agent_id = claims.agent_id().to_string();
        debug!(agent_id = %agent_id, key_id = ?key_id, "Token verified");

        Ok(VerifiedToken {
            claims,
            agent_id,
            key_id,
        })
    }

    fn validation(&self, algorithm: jsonwebtoken::Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.leeway = self.leeway;
        validation.validate_exp = true;
        if let Some(iss) = &self.issuer {
            validation.set_issuer(&[iss]);
        }
        match &self.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        validation
    }
}

fn invalid_reason(reason: impl Into<String>) -> ProxyError {
    ProxyError::InvalidToken {
        reason: reason.into(),
    }
}

fn invalid(err: &jsonwebtoken::errors::Error) -> ProxyError {
    let reason = match err.kind() {
        ErrorKind::InvalidSignature => "invalid signature".to_string(),
        ErrorKind::ExpiredSignature => "token expired".to_string(),
        ErrorKind::ImmatureSignature => "token not yet valid".to_string(),
        ErrorKind::InvalidIssuer => "issuer mismatch".to_string(),
        ErrorKind::InvalidAudience => "audience mismatch".to_string(),
        ErrorKind::InvalidAlgorithm => "algorithm not allowed".to_string(),
        ErrorKind::MissingRequiredClaim(claim) => format!("missing required claim '{claim}'"),
        ErrorKind::Json(e) => format!("malformed claims: {e}"),
        _ => format!("malformed token: {err}"),
    };
    invalid_reason(reason)
}
