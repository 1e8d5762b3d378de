//! Discovery metadata document.
//!
//! A JSON or YAML file (chosen by extension) describing the proxied
//! services: endpoints plus opaque `resources`, `prompts` and `tools`
//! listings. It is loaded once at startup and served read-only under
//! `/api/mcp`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::EndpointConfig;
use crate::{Error, Result};

/// Parsed discovery document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryDocument {
    /// Service name
    pub name: String,
    /// Document version
    pub version: String,
    /// Free-form description
    pub description: String,
    /// Endpoints, merged into the registry at startup
    pub endpoints: Vec<EndpointConfig>,
    /// Resource listing
    pub resources: Vec<Value>,
    /// Prompt listing
    pub prompts: Vec<Value>,
    /// Tool listing
    pub tools: Vec<Value>,
}

impl DiscoveryDocument {
    /// Load from a `.json`, `.yaml` or `.yml` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or has an
    /// unrecognised extension.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!(
                "Failed to read discovery document {}: {e}",
                path.display()
            ))
        })?;

        match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
            "json" => Ok(serde_json::from_str(&content)?),
            "yaml" | "yml" => Ok(serde_yaml::from_str(&content)?),
            other => Err(Error::Config(format!(
                "Unsupported discovery document extension '{other}' ({})",
                path.display()
            ))),
        }
    }

    /// Append this document's endpoints to `configured`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if an id appears in both.
    pub fn merge_endpoints(&self, configured: &[EndpointConfig]) -> Result<Vec<EndpointConfig>> {
        let mut merged = configured.to_vec();
        for endpoint in &self.endpoints {
            if merged.iter().any(|e| e.id == endpoint.id) {
                return Err(Error::Config(format!(
                    "endpoint '{}' is declared both in config and in the discovery document",
                    endpoint.id
                )));
            }
            merged.push(endpoint.clone());
        }
        Ok(merged)
    }

    /// The document as served to clients; secret hashes are stripped.
    #[must_use]
    pub fn public_view(&self) -> Value {
        let endpoints: Vec<Value> = self
            .endpoints
            .iter()
            .map(|e| json!({"id": e.id, "name": e.name, "baseUrl": e.base_url}))
            .collect();

        json!({
            "name": self.name,
            "version": self.version,
            "description": self.description,
            "endpoints": endpoints,
            "resources": self.resources,
            "prompts": self.prompts,
            "tools": self.tools,
        })
    }
}
