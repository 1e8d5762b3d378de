//! Downstream forwarding.
//!
//! Rebuilds the request against the endpoint's base URL and relays the
//! downstream status, body and content type verbatim. One attempt, bounded
//! by the configured timeout; redirects are returned to the caller, not
//! followed.

use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::error::ProxyError;
use crate::registry::Endpoint;
use crate::{Error, Result};

/// The parts of an authorized request that travel downstream.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    /// HTTP method
    pub method: Method,
    /// Normalized resource path
    pub resource_path: String,
    /// Raw query string, without `?`
    pub query: Option<String>,
    /// `Content-Type` of the body
    pub content_type: Option<HeaderValue>,
    /// `Accept` header
    pub accept: Option<HeaderValue>,
    /// Request body
    pub body: Bytes,
}

/// Downstream answer, relayed as-is.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// Status code
    pub status: StatusCode,
    /// `Content-Type`, if any
    pub content_type: Option<HeaderValue>,
    /// Body
    pub body: Bytes,
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        if let Some(content_type) = self.content_type {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
        }
        response
    }
}

/// HTTP client shared by all forwarded calls.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
}

impl Forwarder {
    /// Build with a per-call `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create forwarding client: {e}")))?;
        Ok(Self { client })
    }

    /// Send `request` to `endpoint`.
    ///
    /// # Errors
    ///
    /// [`ProxyError::Upstream`] on connection failure, timeout, or a body
    /// that cannot be read. Downstream error statuses are not errors.
    pub async fn forward(
        &self,
        endpoint: &Endpoint,
        request: ForwardRequest,
    ) -> std::result::Result<UpstreamResponse, ProxyError> {
        let url = target_url(
            &endpoint.base_url,
            &request.resource_path,
            request.query.as_deref(),
        )
        .map_err(ProxyError::Upstream)?;
        debug!(endpoint = %endpoint.id, method = %request.method, url = %url, "Forwarding");

        let mut builder = self.client.request(request.method, url);
        if let Some(content_type) = request.content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        if let Some(accept) = request.accept {
            builder = builder.header(header::ACCEPT, accept);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await.map_err(|e| {
            warn!(endpoint = %endpoint.id, error = %e, "Upstream request failed");
            ProxyError::Upstream(describe(&e))
        })?;

        let status = response.status();
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let body = response.bytes().await.map_err(|e| {
            warn!(endpoint = %endpoint.id, error = %e, "Upstream body read failed");
            ProxyError::Upstream(describe(&e))
        })?;

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

/// `base_url` + resource path + `?query`.
///
/// Each path segment is percent-encoded, so a decoded `?`, `#`, `%` or `\\`
/// stays inside its segment.
///
/// # Errors
///
/// Fails when `base_url` is not a URL that can carry a path.
pub fn target_url(
    base_url: &str,
    resource_path: &str,
    query: Option<&str>,
) -> std::result::Result<Url, String> {
    let mut url = Url::parse(base_url).map_err(|e| format!("invalid base url '{base_url}': {e}"))?;
    url.path_segments_mut()
        .map_err(|()| format!("base url '{base_url}' cannot carry a path"))?
        .pop_if_empty()
        .extend(resource_path.trim_start_matches('/').split('/'));
    url.set_query(query.filter(|q| !q.is_empty()));
    Ok(url)
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}
