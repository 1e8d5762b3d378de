//! Error types for the ArmorIQ proxy
//!
//! Two layers live here:
//!
//! - [`Error`]: startup and ambient failures (configuration, key material,
//!   TLS, I/O). These abort process startup.
//! - [`ProxyError`]: the per-request taxonomy produced by the authorization
//!   pipeline. Every variant maps to exactly one HTTP status and is rendered
//!   as a JSON body; none of them escapes the request boundary.

use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::policy::Verb;

/// Result type alias for the proxy
pub type Result<T> = std::result::Result<T, Error>;

/// Startup / ambient errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS material could not be loaded or assembled
    #[error("TLS error: {0}")]
    Tls(String),

    /// Token verification material could not be loaded
    #[error("Token key material error: {0}")]
    Token(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Terminal outcome of a rejected or failed proxied request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    /// No shared-secret header was supplied
    #[error("API key missing")]
    MissingApiKey,

    /// The shared secret does not match the endpoint's stored hash
    #[error("invalid API key for endpoint '{0}'")]
    InvalidApiKey(String),

    /// No signed token was supplied
    #[error("token missing")]
    MissingToken,

    /// The token failed verification; `reason` is for the audit trail only
    #[error("invalid token: {reason}")]
    InvalidToken {
        /// Human-readable verification failure
        reason: String,
    },

    /// The endpoint id is not registered
    #[error("endpoint '{0}' not found")]
    EndpointNotFound(String),

    /// No policy applies, or the policy denies the verb/resource
    #[error("{reason}")]
    Forbidden {
        /// Permission verb that was required
        verb: Verb,
        /// Resource path that was rejected, when resource-scoped
        resource: Option<String>,
        /// Human-readable denial reason
        reason: String,
    },

    /// HTTP method has no permission verb
    #[error("method {0} not allowed")]
    MethodNotAllowed(String),

    /// Request body exceeded the configured limit or could not be read
    #[error("request body rejected: {0}")]
    PayloadTooLarge(String),

    /// Downstream service could not be reached
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Token verifier has no key material
    #[error("token verifier not configured")]
    VerifierUnavailable,
}

impl ProxyError {
    /// HTTP status returned to the caller
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingApiKey | Self::MissingToken | Self::InvalidToken { .. } => {
                StatusCode::UNAUTHORIZED
            }
            Self::InvalidApiKey(_) | Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::EndpointNotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::VerifierUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable error kind string for the JSON body
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingApiKey | Self::MissingToken | Self::InvalidToken { .. } => {
                "AuthenticationError"
            }
            Self::InvalidApiKey(_) | Self::Forbidden { .. } => "AuthorizationError",
            Self::EndpointNotFound(_) => "NotFoundError",
            Self::MethodNotAllowed(_) => "MethodNotAllowed",
            Self::PayloadTooLarge(_) => "PayloadTooLarge",
            Self::Upstream(_) => "UpstreamError",
            Self::VerifierUnavailable => "ServiceUnavailable",
        }
    }

    /// Message safe to show the caller.
    ///
    /// Token verification detail stays in the audit trail.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidToken { .. } => "invalid or expired token".to_string(),
            Self::Upstream(_) => "failed to reach upstream endpoint".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.kind(),
            "message": self.public_message(),
        });
        if let Self::Forbidden { verb, resource, .. } = &self {
            body["requiredPermission"] = json!(verb.as_str());
            if let Some(resource) = resource {
                body["resource"] = json!(resource);
            }
        }

        let mut response = (self.status(), Json(body)).into_response();
        if self.status() == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert("WWW-Authenticate", axum::http::HeaderValue::from_static("Bearer"));
        }
        response
    }
}
