//! ArmorIQ Proxy Library
//!
//! Policy-enforcing reverse proxy between agents and data endpoints.
//!
//! # Request pipeline
//!
//! - **mTLS identity**: client certificate summary and verification status
//! - **Shared secret**: per-endpoint Argon2-hashed API key
//! - **Signed token**: JWT verified against one public key or a JWKS key set
//! - **Policy**: token-embedded grants resolved to allow/deny per verb and path
//! - **Forwarding**: single bounded call to the endpoint's base URL
//! - **Audit**: exactly one append-only record per request

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod gateway;
pub mod mtls;
pub mod policy;
pub mod registry;
pub mod token;

pub use error::{Error, ProxyError, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` overrides `level` when set.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(format!("tracing init failed: {e}"))),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(format!("tracing init failed: {e}"))),
    }
}
