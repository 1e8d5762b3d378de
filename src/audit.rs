//! Append-only audit trail of authorization decisions.
//!
//! Exactly one [`AuditRecord`] is appended per proxied request, whatever the
//! outcome. Records are kept in memory for the process lifetime; only a
//! bounded recent window is exposed over HTTP. Every record is also emitted
//! via `tracing::info!` so the trail reaches log aggregators:
//!
//! ```text
//! INFO armoriq_proxy::audit audit={"outcome":"GRANTED","endpointId":"svc",...}
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::mtls::CertSummary;
use crate::policy::Verb;
use crate::token::VerifiedToken;

/// Final outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditOutcome {
    /// Authorized (and forwarded, or abandoned by the client)
    Granted,
    /// Rejected by authentication or authorization
    Denied,
    /// Authorized but the downstream call failed, or the verifier is unavailable
    Error,
}

/// Token claims relevant to a decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSummary {
    /// `iss`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// `aud`, comma-joined
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    /// `sub`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// `exp`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// `jti`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    /// `kid` of the verifying key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Resource path that was evaluated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Verb that was evaluated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verb: Option<Verb>,
}

impl TokenSummary {
    /// Summarise a verified token.
    #[must_use]
    pub fn from_token(token: &VerifiedToken) -> Self {
        let claims = &token.claims;
        Self {
            issuer: claims.iss.clone(),
            audience: claims.aud.as_ref().map(crate::token::Audience::joined),
            subject: claims.sub.clone(),
            expires_at: i64::try_from(claims.exp)
                .ok()
                .and_then(|exp| DateTime::from_timestamp(exp, 0)),
            token_id: claims.jti.clone(),
            key_id: token.key_id.clone(),
            resource: None,
            verb: None,
        }
    }

    /// Attach the evaluated resource and verb.
    #[must_use]
    pub fn with_evaluation(mut self, verb: Verb, resource: impl Into<String>) -> Self {
        self.verb = Some(verb);
        self.resource = Some(resource.into());
        self
    }
}

/// One immutable entry in the trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Request id
    pub id: String,
    /// Append time
    pub timestamp: DateTime<Utc>,
    /// Target endpoint id
    pub endpoint_id: String,
    /// Caller identity (token-derived, else `"unknown"`)
    pub agent_id: String,
    /// HTTP method
    pub method: String,
    /// Resource path relative to the endpoint
    pub path: String,
    /// Outcome
    pub outcome: AuditOutcome,
    /// HTTP status returned to the caller
    pub status: u16,
    /// Short reason
    pub message: String,
    /// Whether a client certificate was verified
    pub mtls_verified: bool,
    /// Client certificate, if presented
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_summary: Option<CertSummary>,
    /// Token claims, once verified
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_summary: Option<TokenSummary>,
    /// Remote address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
}

/// In-memory append-only sequence of [`AuditRecord`]s.
#[derive(Debug, Default)]
pub struct AuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl AuditLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and emit it as a tracing event.
    ///
    /// The timestamp is assigned under the lock, so insertion order is
    /// chronological order.
    pub fn append(&self, mut record: AuditRecord) {
        {
            let mut records = self.records.lock();
            record.timestamp = Utc::now();
            records.push(record.clone());
        }
        emit(&record);
    }

    /// The most recent `n` records, oldest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<AuditRecord> {
        let records = self.records.lock();
        let start = records.len().saturating_sub(n);
        records[start..].to_vec()
    }

    /// Total number of records appended.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing has been appended yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

fn emit(record: &AuditRecord) {
    match serde_json::to_string(record) {
        Ok(ref json) => tracing::info!(audit = %json, "proxy audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit record"),
    }
}
