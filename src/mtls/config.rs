//! Transport TLS / mTLS configuration.
//!
//! # Example YAML
//!
//! ```yaml
//! mtls:
//!   server_cert: "/etc/armoriq/tls/server.crt"
//!   server_key:  "/etc/armoriq/tls/server.key"
//!   ca_cert:     "/etc/armoriq/tls/ca.crt"
//!   require_client_cert: false
//! ```
//!
//! Without `server_cert` / `server_key` the proxy listens on plain HTTP.
//! With a `ca_cert`, client certificates are requested and verified; they
//! are only mandatory when `require_client_cert` is set.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Top-level mTLS configuration block.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MtlsConfig {
    /// Path to the PEM-encoded server certificate chain.
    pub server_cert: String,

    /// Path to the PEM-encoded server private key.
    pub server_key: String,

    /// Path to the PEM-encoded CA bundle used to verify client certs.
    pub ca_cert: String,

    /// Reject clients without a valid certificate at the TLS handshake.
    ///
    /// When `false` (default) the client certificate is supplementary
    /// evidence: it is verified and recorded in the audit trail when
    /// presented, but its absence does not block the request.
    pub require_client_cert: bool,
}

impl MtlsConfig {
    /// Whether the listener terminates TLS.
    #[must_use]
    pub fn tls_enabled(&self) -> bool {
        !self.server_cert.trim().is_empty() && !self.server_key.trim().is_empty()
    }

    /// Whether client certificates are requested and verified.
    #[must_use]
    pub fn client_auth_enabled(&self) -> bool {
        self.tls_enabled() && !self.ca_cert.trim().is_empty()
    }

    /// Reject partially configured TLS material.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the missing piece.
    pub fn validate(&self) -> Result<()> {
        let has_cert = !self.server_cert.trim().is_empty();
        let has_key = !self.server_key.trim().is_empty();
        let has_ca = !self.ca_cert.trim().is_empty();

        if has_cert != has_key {
            return Err(Error::Config(
                "mtls: server_cert and server_key must be set together".to_string(),
            ));
        }
        if has_ca && !has_cert {
            return Err(Error::Config(
                "mtls: ca_cert requires server_cert and server_key".to_string(),
            ));
        }
        if self.require_client_cert && !has_ca {
            return Err(Error::Config(
                "mtls: require_client_cert requires ca_cert".to_string(),
            ));
        }
        Ok(())
    }
}
