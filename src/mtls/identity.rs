//! Client certificate identity extraction.
//!
//! Parses the DER peer certificate negotiated on a TLS connection into a
//! [`CertSummary`] for the audit trail, and pairs it with whether the chain
//! was verified against the configured CA ([`PeerIdentity`]).
//!
//! Absence of a certificate is not an error: the identity is simply
//! anonymous and unverified.

use chrono::{DateTime, Utc};
use rustls::pki_types::CertificateDer;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Certificate summary
// ─────────────────────────────────────────────────────────────────────────────

/// Audit-relevant fields of a client certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertSummary {
    /// Subject distinguished name.
    pub subject: String,
    /// Issuer distinguished name.
    pub issuer: String,
    /// Start of the validity window.
    pub not_before: Option<DateTime<Utc>>,
    /// End of the validity window.
    pub not_after: Option<DateTime<Utc>>,
    /// Serial number, colon-separated hex.
    pub serial_number: String,
    /// SHA-256 of the DER encoding, lowercase hex.
    pub fingerprint: String,
    /// SPIFFE URI if present, else the CN, else `"<unknown>"`.
    pub display_name: String,
}

impl CertSummary {
    /// Parse a DER-encoded certificate.
    ///
    /// # Errors
    ///
    /// Returns `Error::Tls` if the certificate cannot be parsed.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Tls(format!("Failed to parse client certificate: {e}")))?;

        let validity = cert.validity();
        let common_name = extract_cn(&cert);
        let san_uris = extract_san_uris(&cert);

        Ok(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            not_before: DateTime::from_timestamp(validity.not_before.timestamp(), 0),
            not_after: DateTime::from_timestamp(validity.not_after.timestamp(), 0),
            serial_number: cert.raw_serial_as_string(),
            fingerprint: hex::encode(Sha256::digest(der)),
            display_name: build_display_name(common_name.as_ref(), &san_uris),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-connection identity
// ─────────────────────────────────────────────────────────────────────────────

/// Transport-level identity of the caller, attached to every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerIdentity {
    /// The leaf client certificate, if one was presented.
    pub certificate: Option<CertSummary>,
    /// Whether the chain validated against the configured CA.
    pub verified: bool,
}

impl PeerIdentity {
    /// Identity for connections without TLS client authentication.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Build from the peer chain rustls recorded for a connection.
    ///
    /// `client_auth` says whether a CA-backed client verifier ran during the
    /// handshake; only then does a presented certificate count as verified.
    #[must_use]
    pub fn from_peer_chain(chain: Option<&[CertificateDer<'_>]>, client_auth: bool) -> Self {
        let Some(leaf) = chain.and_then(<[_]>::first) else {
            return Self::anonymous();
        };

        match CertSummary::from_der(leaf.as_ref()) {
            Ok(summary) => Self {
                certificate: Some(summary),
                verified: client_auth,
            },
            Err(e) => {
                warn!(error = %e, "Unparseable client certificate, treating as unverified");
                Self::anonymous()
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extraction helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Extract the CN attribute from the subject DN.
fn extract_cn(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

/// Extract SAN URI entries.
fn extract_san_uris(cert: &X509Certificate<'_>) -> Vec<String> {
    let mut uris = Vec::new();
    if let Ok(Some(san_ext)) = cert.subject_alternative_name() {
        for name in &san_ext.value.general_names {
            if let GeneralName::URI(uri) = name {
                uris.push((*uri).to_owned());
            }
        }
    }
    uris
}

/// Prefers the SPIFFE URI if present, then CN, then `"<unknown>"`.
fn build_display_name(cn: Option<&String>, san_uris: &[String]) -> String {
    san_uris
        .iter()
        .find(|u| u.starts_with("spiffe://"))
        .map(String::as_str)
        .or_else(|| cn.map(String::as_str))
        .unwrap_or("<unknown>")
        .to_owned()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
