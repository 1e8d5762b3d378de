//! Endpoint registry and shared-secret verification.
//!
//! Built once at startup from the configured and discovered endpoints; never
//! mutated afterwards. Each endpoint carries an Argon2 PHC hash of its shared
//! secret; the plaintext never leaves the request.

use std::collections::HashMap;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::EndpointConfig;
use crate::error::ProxyError;
use crate::{Error, Result};

/// A registered downstream service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Identifier used in `/proxy/{id}` and in token policies
    pub id: String,
    /// Display name
    pub name: String,
    /// Base URL, no trailing slash
    pub base_url: String,
    /// Argon2 PHC string
    #[serde(skip)]
    pub hashed_secret: String,
}

/// Read-only map of endpoint id to [`Endpoint`].
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    endpoints: HashMap<String, Endpoint>,
}

impl EndpointRegistry {
    /// Build from endpoint configs.
    ///
    /// Endpoints without a `base_url` inherit `default_base_url`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` on duplicate ids, a missing base URL, or a
    /// secret hash that is not a valid PHC string.
    pub fn from_configs(configs: &[EndpointConfig], default_base_url: Option<&str>) -> Result<Self> {
        let mut endpoints = HashMap::with_capacity(configs.len());

        for cfg in configs {
            let base_url = cfg
                .base_url
                .as_deref()
                .or(default_base_url)
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .ok_or_else(|| {
                    Error::Config(format!("endpoint '{}' has no base_url", cfg.id))
                })?;

            PasswordHash::new(&cfg.api_key_hash).map_err(|e| {
                Error::Config(format!("endpoint '{}': invalid api_key_hash: {e}", cfg.id))
            })?;

            let endpoint = Endpoint {
                id: cfg.id.clone(),
                name: if cfg.name.is_empty() {
                    cfg.id.clone()
                } else {
                    cfg.name.clone()
                },
                base_url: base_url.trim_end_matches('/').to_string(),
                hashed_secret: cfg.api_key_hash.clone(),
            };

            if endpoints.insert(cfg.id.clone(), endpoint).is_some() {
                return Err(Error::Config(format!("duplicate endpoint id '{}'", cfg.id)));
            }
        }

        debug!(count = endpoints.len(), "Endpoint registry built");
        Ok(Self { endpoints })
    }

    /// Look up an endpoint.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Endpoint> {
        self.endpoints.get(id)
    }

    /// Number of registered endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether no endpoint is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Endpoints sorted by id.
    #[must_use]
    pub fn list(&self) -> Vec<&Endpoint> {
        let mut list: Vec<_> = self.endpoints.values().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Check the caller's shared secret for `endpoint_id`.
    ///
    /// A missing secret is reported before the endpoint lookup. The Argon2
    /// check runs on the blocking pool.
    ///
    /// # Errors
    ///
    /// `MissingApiKey` (401), `EndpointNotFound` (404) or `InvalidApiKey` (403).
    pub async fn verify_api_key(
        &self,
        endpoint_id: &str,
        provided: Option<&str>,
    ) -> std::result::Result<&Endpoint, ProxyError> {
        let provided = provided
            .filter(|k| !k.is_empty())
            .ok_or(ProxyError::MissingApiKey)?
            .to_string();

        let endpoint = self
            .get(endpoint_id)
            .ok_or_else(|| ProxyError::EndpointNotFound(endpoint_id.to_string()))?;

        let hashed = endpoint.hashed_secret.clone();
        let matches = tokio::task::spawn_blocking(move || secret_matches(&hashed, &provided))
            .await
            .unwrap_or_else(|err| {
                warn!(endpoint = %endpoint_id, error = %err, "Secret verification task failed");
                false
            });

        if matches {
            Ok(endpoint)
        } else {
            Err(ProxyError::InvalidApiKey(endpoint_id.to_string()))
        }
    }
}

fn secret_matches(hashed: &str, provided: &str) -> bool {
    PasswordHash::new(hashed).is_ok_and(|hash| {
        Argon2::default()
            .verify_password(provided.as_bytes(), &hash)
            .is_ok()
    })
}

/// Hash a shared secret into an Argon2id PHC string.
///
/// # Errors
///
/// Returns `Error::Internal` if hashing fails.
pub fn hash_secret(secret: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Internal(format!("failed to hash secret: {e}")))
}
