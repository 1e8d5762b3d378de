//! Authorization decision for one request.

use axum::http::Method;
use serde::Serialize;
use tracing::debug;

use super::pattern::normalize_path;
use super::permission::{GrantSource, PermissionSpec, resolve_permission};
use super::{Policy, Verb};
use crate::error::ProxyError;

/// Outcome of policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionOutcome {
    /// The request may be forwarded.
    Granted,
    /// The request is rejected with 403.
    Denied,
}

/// The policy (and grant) that produced a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedPolicy {
    /// Position of the policy in the token's list.
    pub index: usize,
    /// The policy's endpoint id.
    pub endpoint: String,
    /// Which part of the policy granted or denied the verb.
    pub source: GrantSource,
    /// The resource pattern that matched, for path-scoped grants.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// Per-request authorization decision, consumed by the forwarder and the
/// audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationDecision {
    /// Target endpoint.
    pub endpoint_id: String,
    /// Normalized resource path that was evaluated.
    pub resource_path: String,
    /// Required verb.
    pub verb: Verb,
    /// Granted or denied.
    pub outcome: DecisionOutcome,
    /// The first policy for the endpoint, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_policy: Option<MatchedPolicy>,
    /// Short human-readable explanation.
    pub reason: String,
    /// Whether a denial concerned a specific resource (vs. the verb as a whole).
    #[serde(skip)]
    resource_scoped: bool,
}

impl AuthorizationDecision {
    /// Whether the request may proceed.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        self.outcome == DecisionOutcome::Granted
    }

    /// Convert a denial into the 403 error carried back to the caller.
    pub fn into_result(self) -> Result<Self, ProxyError> {
        if self.is_granted() {
            return Ok(self);
        }
        Err(ProxyError::Forbidden {
            verb: self.verb,
            resource: self.resource_scoped.then(|| self.resource_path.clone()),
            reason: self.reason,
        })
    }
}

/// Full resolution: method → verb, path normalization, then [`evaluate`].
///
/// Methods outside GET/POST/PUT/PATCH/DELETE fail with
/// [`ProxyError::MethodNotAllowed`] before any policy is looked at.
pub fn authorize(
    policies: &[Policy],
    endpoint_id: &str,
    method: &Method,
    raw_path: &str,
) -> Result<AuthorizationDecision, ProxyError> {
    let verb = Verb::from_method(method)
        .ok_or_else(|| ProxyError::MethodNotAllowed(method.to_string()))?;
    let resource_path = normalize_path(raw_path);
    evaluate(policies, endpoint_id, verb, &resource_path).into_result()
}

/// Evaluate `verb` on `resource_path` against the token's policies.
///
/// Pure function of its inputs. The first policy whose endpoint equals
/// `endpoint_id` is used; later ones are ignored.
#[must_use]
pub fn evaluate(
    policies: &[Policy],
    endpoint_id: &str,
    verb: Verb,
    resource_path: &str,
) -> AuthorizationDecision {
    let decision = |outcome, matched_policy, reason: String, resource_scoped| AuthorizationDecision {
        endpoint_id: endpoint_id.to_string(),
        resource_path: resource_path.to_string(),
        verb,
        outcome,
        matched_policy,
        reason,
        resource_scoped,
    };

    let Some((index, policy)) = policies
        .iter()
        .enumerate()
        .find(|(_, p)| p.endpoint == endpoint_id)
    else {
        debug!(endpoint = %endpoint_id, "No policy for endpoint");
        return decision(
            DecisionOutcome::Denied,
            None,
            format!("no policy for endpoint '{endpoint_id}'"),
            false,
        );
    };

    let resolved = resolve_permission(policy, verb);
    let matched = |pattern: Option<String>| MatchedPolicy {
        index,
        endpoint: policy.endpoint.clone(),
        source: resolved.source,
        pattern,
    };

    match &resolved.spec {
        PermissionSpec::Denied => decision(
            DecisionOutcome::Denied,
            Some(matched(None)),
            format!("missing '{verb}' permission for endpoint '{endpoint_id}'"),
            false,
        ),
        PermissionSpec::GrantedAny => decision(
            DecisionOutcome::Granted,
            Some(matched(Some("*".to_string()))),
            format!("'{verb}' granted on all resources"),
            false,
        ),
        PermissionSpec::GrantedPaths(patterns) => {
            match patterns.iter().find(|p| p.matches(resource_path)) {
                Some(pattern) => decision(
                    DecisionOutcome::Granted,
                    Some(matched(Some(pattern.to_string()))),
                    format!("'{verb}' granted on '{resource_path}' by '{pattern}'"),
                    true,
                ),
                None => decision(
                    DecisionOutcome::Denied,
                    Some(matched(None)),
                    format!("'{verb}' permission does not cover resource '{resource_path}'"),
                    true,
                ),
            }
        }
    }
}
