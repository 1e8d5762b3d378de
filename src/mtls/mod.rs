//! Transport security: TLS termination and client certificate identity.
//!
//! ```text
//! TCP connection
//!   → TLS handshake  (rustls verifies the client cert against the CA, if any)
//!   → PeerIdentity extracted from the peer certificate
//!   → Injected into request extensions
//!   → Authorization pipeline records it in the audit trail
//! ```
//!
//! The certificate never grants access on its own: it is evidence attached
//! to every audit record, while authorization rests on the shared secret and
//! the signed token.

pub mod config;
pub mod identity;
pub mod tls;

pub use config::MtlsConfig;
pub use identity::{CertSummary, PeerIdentity};
pub use tls::{build_tls_config, load_certs, load_private_key};
