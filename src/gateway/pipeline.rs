//! The per-request authorization pipeline.
//!
//! ```text
//! peer identity ─► shared secret ─► token ─► policy ─► forward
//!        │               │            │         │         │
//!        └───────────────┴─────┬──────┴─────────┴─────────┘
//!                              ▼
//!                  exactly one audit record
//! ```
//!
//! Every stage either hands its output to the next one or ends the request
//! with a [`ProxyError`]. The [`AuditGuard`] guarantees that exactly one
//! record is appended whichever way the request ends, including when the
//! client disconnects after the grant, while the body is read or the
//! downstream call is in flight.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    extract::{ConnectInfo, Request},
    http::{HeaderMap, HeaderValue, header, request::Parts},
    response::{IntoResponse, Response},
};
use tracing::debug;
use uuid::Uuid;

use super::AppState;
use super::forward::ForwardRequest;
use crate::audit::{AuditLog, AuditOutcome, AuditRecord, TokenSummary};
use crate::error::ProxyError;
use crate::mtls::PeerIdentity;
use crate::policy::{Verb, evaluate, has_dot_segment, normalize_path};
use crate::token::{UNKNOWN_AGENT, VerifiedToken};

/// Shared-secret header.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Alternative to `Authorization: Bearer`.
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";
/// Response header carrying the audit record id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const DISCONNECTED: &str = "client disconnected before upstream response";
/// Status recorded when the caller went away (no response was sent).
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Owns the request's audit record until it is appended.
///
/// Once [`AuditGuard::authorized`] has been called, dropping the guard
/// without [`AuditGuard::finish`] appends a GRANTED record noting the
/// disconnect. Authorization is marked as soon as the policy grants, before
/// the body is read.
pub struct AuditGuard {
    log: Arc<AuditLog>,
    record: Option<AuditRecord>,
    authorized: bool,
}

impl AuditGuard {
    fn new(log: Arc<AuditLog>, record: AuditRecord) -> Self {
        Self {
            log,
            record: Some(record),
            authorized: false,
        }
    }

    fn id(&self) -> String {
        self.record.as_ref().map(|r| r.id.clone()).unwrap_or_default()
    }

    fn with_record(&mut self, f: impl FnOnce(&mut AuditRecord)) {
        if let Some(record) = self.record.as_mut() {
            f(record);
        }
    }

    fn set_token(&mut self, token: &VerifiedToken) {
        self.with_record(|r| {
            r.agent_id.clone_from(&token.agent_id);
            r.token_summary = Some(TokenSummary::from_token(token));
        });
    }

    fn set_evaluation(&mut self, verb: Verb, resource: &str) {
        self.with_record(|r| {
            r.path = resource.to_string();
            r.token_summary = r
                .token_summary
                .take()
                .map(|s| s.with_evaluation(verb, resource));
        });
    }

    fn authorized(&mut self, reason: &str) {
        self.authorized = true;
        self.with_record(|r| r.message = reason.to_string());
    }

    fn finish(&mut self, outcome: AuditOutcome, status: u16, message: String) {
        if let Some(mut record) = self.record.take() {
            record.outcome = outcome;
            record.status = status;
            record.message = message;
            self.log.append(record);
        }
    }
}

impl Drop for AuditGuard {
    fn drop(&mut self) {
        if self.authorized {
            self.finish(
                AuditOutcome::Granted,
                CLIENT_CLOSED_REQUEST,
                DISCONNECTED.to_string(),
            );
        }
    }
}

/// Run the pipeline for `/proxy/{endpoint_id}/{raw_path}`.
pub async fn run(
    state: Arc<AppState>,
    endpoint_id: String,
    raw_path: String,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();

    let peer = parts
        .extensions
        .get::<PeerIdentity>()
        .cloned()
        .unwrap_or_default();
    let client_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let record = AuditRecord {
        id: Uuid::new_v4().to_string(),
        timestamp: chrono::Utc::now(),
        endpoint_id: endpoint_id.clone(),
        agent_id: UNKNOWN_AGENT.to_string(),
        method: parts.method.to_string(),
        path: normalize_path(&raw_path),
        outcome: AuditOutcome::Denied,
        status: 0,
        message: String::new(),
        mtls_verified: peer.verified,
        cert_summary: peer.certificate,
        token_summary: None,
        client_ip,
    };
    let mut audit = AuditGuard::new(Arc::clone(&state.audit), record);
    let request_id = audit.id();

    let outcome = authorize_and_forward(&state, &parts, body, &endpoint_id, &raw_path, &mut audit);
    let mut response = match outcome.await {
        Ok(response) => response,
        Err(err) => {
            let outcome = match &err {
                ProxyError::Upstream(_) | ProxyError::VerifierUnavailable => AuditOutcome::Error,
                _ => AuditOutcome::Denied,
            };
            audit.finish(outcome, err.status().as_u16(), err.to_string());
            err.into_response()
        }
    };

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn authorize_and_forward(
    state: &AppState,
    parts: &Parts,
    body: Body,
    endpoint_id: &str,
    raw_path: &str,
    audit: &mut AuditGuard,
) -> Result<Response, ProxyError> {
    // Shared secret (401 missing / 404 unknown endpoint / 403 mismatch)
    let endpoint = state
        .registry
        .verify_api_key(endpoint_id, header_str(&parts.headers, API_KEY_HEADER))
        .await?;

    // Token
    if !state.verifier.is_configured() {
        return Err(ProxyError::VerifierUnavailable);
    }
    let raw_token = bearer_token(&parts.headers).ok_or(ProxyError::MissingToken)?;
    let token = state.verifier.verify(raw_token)?;
    audit.set_token(&token);

    // Policy
    let verb = Verb::from_method(&parts.method)
        .ok_or_else(|| ProxyError::MethodNotAllowed(parts.method.to_string()))?;
    let resource = normalize_path(raw_path);
    audit.set_evaluation(verb, &resource);
    if has_dot_segment(&resource) {
        return Err(ProxyError::Forbidden {
            verb,
            resource: Some(resource),
            reason: "dot segments are not allowed in resource paths".to_string(),
        });
    }
    let decision = evaluate(&token.claims.policies, endpoint_id, verb, &resource).into_result()?;
    debug!(
        endpoint = %endpoint_id,
        agent = %token.agent_id,
        verb = %verb,
        resource = %resource,
        "Request authorized"
    );
    audit.authorized(&decision.reason);

    let body = to_bytes(body, state.max_body_size)
        .await
        .map_err(|e| ProxyError::PayloadTooLarge(e.to_string()))?;

    // Forward
    let upstream = state
        .forwarder
        .forward(
            endpoint,
            ForwardRequest {
                method: parts.method.clone(),
                resource_path: resource,
                query: parts.uri.query().map(str::to_string),
                content_type: parts.headers.get(header::CONTENT_TYPE).cloned(),
                accept: parts.headers.get(header::ACCEPT).cloned(),
                body,
            },
        )
        .await?;

    audit.finish(
        AuditOutcome::Granted,
        upstream.status.as_u16(),
        decision.reason,
    );
    Ok(upstream.into_response())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Token from `Authorization: Bearer <t>` (scheme case-insensitive), else
/// from the access-token header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, header::AUTHORIZATION.as_str())
        .and_then(|value| {
            let (scheme, token) = value.split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
        })
        .filter(|t| !t.is_empty())
        .or_else(|| header_str(headers, ACCESS_TOKEN_HEADER))
}
