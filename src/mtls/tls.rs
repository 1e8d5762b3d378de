//! rustls server configuration and PEM loading.
//!
//! All certificate and key files are expected in PEM format.

use std::fs;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use tracing::debug;

use crate::mtls::config::MtlsConfig;
use crate::{Error, Result};

/// Build a `rustls::ServerConfig` from the transport configuration.
///
/// With a CA bundle, client certificates are requested and verified against
/// it; `require_client_cert` decides whether a missing certificate fails the
/// handshake. Without a CA bundle, no client certificate is requested.
///
/// # Errors
///
/// Returns `Error::Tls` if any certificate or key file cannot be read or
/// parsed, or the cert/key pair does not match.
pub fn build_tls_config(config: &MtlsConfig) -> Result<ServerConfig> {
    let server_certs = load_certs(&config.server_cert)?;
    let server_key = load_private_key(&config.server_key)?;

    let builder = ServerConfig::builder();
    let builder = if config.client_auth_enabled() {
        builder.with_client_cert_verifier(build_client_verifier(config)?)
    } else {
        builder.with_no_client_auth()
    };

    let mut tls_cfg = builder
        .with_single_cert(server_certs, server_key)
        .map_err(|e| Error::Tls(format!("TLS config error (cert/key mismatch?): {e}")))?;

    tls_cfg.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    debug!(
        server_cert = %config.server_cert,
        ca_cert = %config.ca_cert,
        require_client_cert = config.require_client_cert,
        "TLS config built"
    );

    Ok(tls_cfg)
}

/// Load all certificates from a PEM file.
///
/// # Errors
///
/// Returns `Error::Tls` if the file cannot be read or holds no certificate.
pub fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let pem_data = read_file(path)?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem_data.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("Failed to parse certs from '{path}': {e}")))?;

    if certs.is_empty() {
        return Err(Error::Tls(format!("No certificates found in '{path}'")));
    }

    Ok(certs)
}

/// Load the first private key (PKCS#8, RSA or SEC1) from a PEM file.
///
/// # Errors
///
/// Returns `Error::Tls` if the file cannot be read or holds no key.
pub fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let pem_data = read_file(path)?;
    rustls_pemfile::private_key(&mut pem_data.as_slice())
        .map_err(|e| Error::Tls(format!("Failed to parse private key from '{path}': {e}")))?
        .ok_or_else(|| Error::Tls(format!("No private key found in '{path}'")))
}

fn read_file(path: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Tls(format!("Cannot read '{path}': {e}")))
}

fn build_client_verifier(
    config: &MtlsConfig,
) -> Result<Arc<dyn rustls::server::danger::ClientCertVerifier>> {
    let mut root_store = rustls::RootCertStore::empty();
    for cert in load_certs(&config.ca_cert)? {
        root_store
            .add(cert)
            .map_err(|e| Error::Tls(format!("Failed to add CA cert to trust store: {e}")))?;
    }

    let builder = WebPkiClientVerifier::builder(Arc::new(root_store));
    let builder = if config.require_client_cert {
        builder
    } else {
        builder.allow_unauthenticated()
    };

    builder
        .build()
        .map_err(|e| Error::Tls(format!("Failed to build client verifier: {e}")))
}
