//! Proxy server: shared state, routes, the authorization pipeline and
//! downstream forwarding.

pub mod forward;
pub mod pipeline;
mod router;
mod server;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

pub use forward::{ForwardRequest, Forwarder, UpstreamResponse};
pub use router::create_router;
pub use server::ProxyServer;

use crate::Result;
use crate::audit::AuditLog;
use crate::config::Config;
use crate::discovery::DiscoveryDocument;
use crate::registry::EndpointRegistry;
use crate::token::TokenVerifier;

/// State shared by every request. Built once at startup and read-only
/// afterwards, apart from the audit log's append.
#[derive(Debug)]
pub struct AppState {
    /// Registered endpoints
    pub registry: EndpointRegistry,
    /// Token verifier
    pub verifier: TokenVerifier,
    /// Downstream client
    pub forwarder: Forwarder,
    /// Audit trail
    pub audit: Arc<AuditLog>,
    /// Discovery document served under `/api/mcp`
    pub discovery: DiscoveryDocument,
    /// Records returned by `/api/audit-logs`
    pub recent_window: usize,
    /// Largest accepted request body (bytes)
    pub max_body_size: usize,
}

impl AppState {
    /// Assemble state from configuration: discovery document, endpoint
    /// registry, token key material and the forwarding client.
    ///
    /// # Errors
    ///
    /// Fails when any of them cannot be loaded; the process must not start.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let discovery = match config.discovery.path.as_deref().filter(|p| !p.is_empty()) {
            Some(path) => {
                let doc = DiscoveryDocument::load(Path::new(path)).await?;
                info!(path = %path, endpoints = doc.endpoints.len(), "Loaded discovery document");
                doc
            }
            None => DiscoveryDocument::default(),
        };

        let endpoints = discovery.merge_endpoints(&config.endpoints)?;
        let registry =
            EndpointRegistry::from_configs(&endpoints, config.upstream.base_url.as_deref())?;
        let verifier = TokenVerifier::from_config(&config.token).await?;
        let forwarder = Forwarder::new(config.upstream.timeout)?;

        Ok(Self {
            registry,
            verifier,
            forwarder,
            audit: Arc::new(AuditLog::new()),
            discovery,
            recent_window: config.audit.recent_window,
            max_body_size: config.server.max_body_size,
        })
    }
}
