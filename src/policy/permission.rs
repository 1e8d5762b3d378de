//! Permission normalization.
//!
//! Raw permission entries are duck-typed JSON. [`resolve_permission`] is the
//! single place that inspects their shape; everything downstream switches on
//! [`PermissionSpec`].
//!
//! # Precedence for a verb
//!
//! 1. Explicit `permissions[verb]` entry:
//!    - `false` / `null` → [`PermissionSpec::Denied`]
//!    - `true` / `"*"` / `"all"` → [`PermissionSpec::GrantedAny`]
//!    - list of paths → [`PermissionSpec::GrantedPaths`]; a list with no
//!      usable entries falls back to the policy's `resources` / `paths`
//!      field, else denied
//! 2. Otherwise the `scopes` list (`endpoint:verb:resource`, `verb:resource`,
//!    bare `verb`).
//! 3. Otherwise denied.

use serde_json::Value;

use super::pattern::PathPattern;
use super::{Policy, Verb};

/// Normalized permission for one verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionSpec {
    /// The verb is not granted.
    Denied,
    /// The verb is granted on every resource.
    GrantedAny,
    /// The verb is granted on the listed resources only.
    GrantedPaths(Vec<PathPattern>),
}

impl PermissionSpec {
    /// Build a path-scoped grant, collapsing to [`PermissionSpec::GrantedAny`]
    /// when a wildcard is present and to [`PermissionSpec::Denied`] when the
    /// list is empty.
    #[must_use]
    pub fn from_patterns(patterns: Vec<PathPattern>) -> Self {
        if patterns.is_empty() {
            Self::Denied
        } else if patterns.contains(&PathPattern::Any) {
            Self::GrantedAny
        } else {
            Self::GrantedPaths(patterns)
        }
    }
}

/// Where a permission came from, kept for the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantSource {
    /// Explicit `permissions[verb]` entry.
    Permission,
    /// Policy-level `resources` / `paths` fallback.
    ResourceFallback,
    /// `scopes` list.
    Scope,
    /// Nothing applied (deny-by-default).
    Default,
}

/// A normalized permission plus its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPermission {
    /// The permission itself.
    pub spec: PermissionSpec,
    /// Which part of the policy produced it.
    pub source: GrantSource,
}

impl ResolvedPermission {
    fn new(spec: PermissionSpec, source: GrantSource) -> Self {
        Self { spec, source }
    }

    fn denied(source: GrantSource) -> Self {
        Self::new(PermissionSpec::Denied, source)
    }
}

/// Resolve the permission `policy` grants for `verb`.
#[must_use]
pub fn resolve_permission(policy: &Policy, verb: Verb) -> ResolvedPermission {
    match policy.permissions.get(verb.as_str()) {
        Some(entry) => from_entry(policy, entry),
        None => from_scopes(policy, verb),
    }
}

/// Normalize an explicit permission entry.
fn from_entry(policy: &Policy, entry: &Value) -> ResolvedPermission {
    match entry {
        Value::Bool(true) => ResolvedPermission::new(PermissionSpec::GrantedAny, GrantSource::Permission),
        Value::String(s) if is_grant_all(s) => {
            ResolvedPermission::new(PermissionSpec::GrantedAny, GrantSource::Permission)
        }
        Value::String(s) => match PathPattern::parse(s) {
            Some(pattern) => ResolvedPermission::new(
                PermissionSpec::from_patterns(vec![pattern]),
                GrantSource::Permission,
            ),
            None => ResolvedPermission::denied(GrantSource::Permission),
        },
        Value::Array(items) => {
            let patterns = usable_patterns(items);
            if !patterns.is_empty() {
                return ResolvedPermission::new(
                    PermissionSpec::from_patterns(patterns),
                    GrantSource::Permission,
                );
            }
            // No usable entry: defer to the policy-level resource list
            match resource_fallback(policy) {
                Some(patterns) => ResolvedPermission::new(
                    PermissionSpec::from_patterns(patterns),
                    GrantSource::ResourceFallback,
                ),
                None => ResolvedPermission::denied(GrantSource::Permission),
            }
        }
        Value::Object(map) => {
            if let Some(inner) = map.get("paths").or_else(|| map.get("resources")) {
                from_entry(policy, inner)
            } else if let Some(flag @ Value::Bool(_)) =
                map.get("allowed").or_else(|| map.get("granted"))
            {
                from_entry(policy, flag)
            } else {
                ResolvedPermission::denied(GrantSource::Permission)
            }
        }
        Value::Null | Value::Bool(false) | Value::Number(_) => {
            ResolvedPermission::denied(GrantSource::Permission)
        }
    }
}

/// Scan the free-form scope list for grants of `verb`.
fn from_scopes(policy: &Policy, verb: Verb) -> ResolvedPermission {
    let mut patterns = Vec::new();

    for scope in &policy.scopes {
        let parts: Vec<&str> = scope.trim().split(':').collect();
        let resource = match parts.as_slice() {
            [endpoint, scope_verb, resource] => {
                let endpoint_ok = endpoint.is_empty() || *endpoint == policy.endpoint;
                (endpoint_ok && verb_matches(scope_verb, verb)).then_some(*resource)
            }
            [scope_verb, resource] => verb_matches(scope_verb, verb).then_some(*resource),
            [scope_verb] if verb_matches(scope_verb, verb) => {
                return ResolvedPermission::new(PermissionSpec::GrantedAny, GrantSource::Scope);
            }
            _ => None,
        };

        if let Some(pattern) = resource.and_then(PathPattern::parse) {
            patterns.push(pattern);
        }
    }

    if patterns.is_empty() {
        ResolvedPermission::denied(GrantSource::Default)
    } else {
        ResolvedPermission::new(PermissionSpec::from_patterns(patterns), GrantSource::Scope)
    }
}

fn verb_matches(segment: &str, verb: Verb) -> bool {
    segment.trim() == verb.as_str()
}

fn is_grant_all(value: &str) -> bool {
    let v = value.trim();
    v == "*" || v.eq_ignore_ascii_case("all")
}

/// String entries of a JSON list that compile to a pattern.
fn usable_patterns(items: &[Value]) -> Vec<PathPattern> {
    items
        .iter()
        .filter_map(Value::as_str)
        .filter_map(PathPattern::parse)
        .collect()
}

/// The policy's top-level `resources` (or `paths`) list, when non-empty.
fn resource_fallback(policy: &Policy) -> Option<Vec<PathPattern>> {
    let raw = policy.resources.as_ref().or(policy.paths.as_ref())?;
    let patterns = match raw {
        Value::Array(items) => usable_patterns(items),
        Value::String(s) => PathPattern::parse(s).into_iter().collect(),
        _ => Vec::new(),
    };
    (!patterns.is_empty()).then_some(patterns)
}
