//! Verification key material: a single PEM public key or a JWKS key set.
//!
//! Loaded once at startup. Symmetric (HMAC) keys are never accepted: the
//! proxy only holds public material.

use std::collections::HashMap;
use std::fs;
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey};
use tracing::{info, warn};

use crate::config::TokenConfig;
use crate::{Error, Result};

/// Asymmetric key type an algorithm belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    /// RS*/PS*
    Rsa,
    /// ES256/ES384
    Ec,
    /// EdDSA (Ed25519)
    Ed,
}

impl KeyFamily {
    /// Family of `alg`, or `None` for symmetric algorithms.
    #[must_use]
    pub fn of(alg: Algorithm) -> Option<Self> {
        match alg {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => Some(Self::Rsa),
            Algorithm::ES256 | Algorithm::ES384 => Some(Self::Ec),
            Algorithm::EdDSA => Some(Self::Ed),
            _ => None,
        }
    }
}

/// One entry of a loaded key set.
#[derive(Clone)]
pub struct SetKey {
    /// Decoding key
    pub key: DecodingKey,
    /// Algorithms this key may verify
    pub family: KeyFamily,
}

/// Verification material, fixed for the process lifetime.
#[derive(Clone)]
pub enum KeySource {
    /// One public key bound to one algorithm.
    PublicKey {
        /// Decoding key
        key: DecodingKey,
        /// The only algorithm accepted
        algorithm: Algorithm,
    },
    /// Keys addressed by the token header's `kid`.
    KeySet(HashMap<String, SetKey>),
}

impl KeySource {
    /// Load whichever mode `config` selects; `None` when neither is set.
    ///
    /// # Errors
    ///
    /// Returns `Error::Token` when configured material cannot be read,
    /// fetched or parsed. Startup must abort in that case.
    pub async fn from_config(config: &TokenConfig) -> Result<Option<Self>> {
        if config.has_public_key() {
            return load_public_key(config).map(Some);
        }
        if config.has_key_set() {
            let jwks = fetch_key_set(config).await?;
            return key_set_from_jwks(&jwks).map(|keys| Some(Self::KeySet(keys)));
        }
        Ok(None)
    }
}

fn load_public_key(config: &TokenConfig) -> Result<KeySource> {
    let algorithm = Algorithm::from_str(config.algorithm.trim())
        .map_err(|e| Error::Token(format!("unknown algorithm '{}': {e}", config.algorithm)))?;
    let family = KeyFamily::of(algorithm).ok_or_else(|| {
        Error::Token(format!(
            "symmetric algorithm '{}' is not supported",
            config.algorithm
        ))
    })?;

    let pem = match config.public_key.as_deref().map(str::trim) {
        Some(inline) if !inline.is_empty() => inline.replace("\\n", "\n"),
        _ => {
            let path = config.public_key_path.as_deref().unwrap_or_default();
            fs::read_to_string(path)
                .map_err(|e| Error::Token(format!("cannot read public key '{path}': {e}")))?
        }
    };

    let key = match family {
        KeyFamily::Rsa => DecodingKey::from_rsa_pem(pem.as_bytes()),
        KeyFamily::Ec => DecodingKey::from_ec_pem(pem.as_bytes()),
        KeyFamily::Ed => DecodingKey::from_ed_pem(pem.as_bytes()),
    }
    .map_err(|e| Error::Token(format!("invalid {algorithm:?} public key: {e}")))?;

    info!(algorithm = ?algorithm, "Token verifier using single public key");
    Ok(KeySource::PublicKey { key, algorithm })
}

async fn fetch_key_set(config: &TokenConfig) -> Result<JwkSet> {
    if let Some(path) = config.jwks_path.as_deref().filter(|p| !p.trim().is_empty()) {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Token(format!("cannot read key set '{path}': {e}")))?;
        return serde_json::from_str(&raw)
            .map_err(|e| Error::Token(format!("invalid key set '{path}': {e}")));
    }

    let url = config.jwks_url.as_deref().unwrap_or_default();
    fetch_remote_key_set(url, config.fetch_timeout)
        .await
        .map_err(|e| Error::Token(format!("cannot fetch key set from '{url}': {e}")))
}

async fn fetch_remote_key_set(url: &str, timeout: Duration) -> Result<JwkSet> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let jwks = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<JwkSet>()
        .await?;
    Ok(jwks)
}

/// Index a JWKS by `kid`.
///
/// Keys without `kid`, symmetric keys and keys that fail to decode are
/// skipped with a warning.
///
/// # Errors
///
/// Returns `Error::Token` if no usable key remains.
pub fn key_set_from_jwks(jwks: &JwkSet) -> Result<HashMap<String, SetKey>> {
    let mut keys = HashMap::new();

    for jwk in &jwks.keys {
        let Some(kid) = jwk.common.key_id.as_deref().filter(|k| !k.is_empty()) else {
            warn!("Skipping key set entry without 'kid'");
            continue;
        };

        let family = match &jwk.algorithm {
            AlgorithmParameters::RSA(_) => KeyFamily::Rsa,
            AlgorithmParameters::EllipticCurve(_) => KeyFamily::Ec,
            AlgorithmParameters::OctetKeyPair(_) => KeyFamily::Ed,
            AlgorithmParameters::OctetKey(_) => {
                warn!(kid = %kid, "Skipping symmetric key in key set");
                continue;
            }
        };

        match DecodingKey::from_jwk(jwk) {
            Ok(key) => {
                keys.insert(kid.to_string(), SetKey { key, family });
            }
            Err(e) => warn!(kid = %kid, error = %e, "Skipping undecodable key set entry"),
        }
    }

    if keys.is_empty() {
        return Err(Error::Token("key set contains no usable keys".to_string()));
    }

    info!(keys = keys.len(), "Token verifier using key set");
    Ok(keys)
}
