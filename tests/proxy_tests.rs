//! End-to-end proxy tests
//!
//! Drives the full router with `oneshot` against a throwaway downstream
//! service bound on 127.0.0.1:0:
//! - shared secret, token and policy enforcement
//! - forwarding and status relay
//! - exactly one audit record per request
//! - admin surface (`/health`, `/api/audit-logs`, `/api/endpoints`, `/api/mcp`)

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use argon2::password_hash::{PasswordHasher, SaltString, rand_core::OsRng};
use argon2::{Algorithm as ArgonAlgorithm, Argon2, Params, Version};
use armoriq_proxy::audit::{AuditOutcome, AuditRecord};
use armoriq_proxy::config::{Config, EndpointConfig, TokenConfig, UpstreamConfig};
use armoriq_proxy::gateway::{AppState, create_router};
use armoriq_proxy::mtls::{CertSummary, PeerIdentity};
use axum::{
    Json, Router,
    body::Body,
    http::{Method, Request, StatusCode, Uri},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use pretty_assertions::assert_eq;
use rcgen::string::Ia5String;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

const SECRET: &str = "svc-shared-secret";
const ISSUER: &str = "https://issuer.test";
const AUDIENCE: &str = "armoriq-proxy";

// ─── helpers ─────────────────────────────────────────────────────────────────

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn cheap_hash(secret: &str) -> String {
    let argon = Argon2::new(
        ArgonAlgorithm::Argon2id,
        Version::V0x13,
        Params::new(64, 1, 1, None).unwrap(),
    );
    let salt = SaltString::generate(&mut OsRng);
    argon.hash_password(secret.as_bytes(), &salt).unwrap().to_string()
}

/// Downstream service echoing what it received.
async fn spawn_backend() -> String {
    let app = Router::new().fallback(|method: Method, uri: Uri, body: String| async move {
        Json(json!({
            "method": method.as_str(),
            "path": uri.path(),
            "query": uri.query(),
            "body": body,
        }))
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

struct Harness {
    app: Router,
    state: Arc<AppState>,
    key: KeyPair,
}

fn config(base_url: String, token: TokenConfig) -> Config {
    Config {
        upstream: UpstreamConfig {
            base_url: Some(base_url),
            timeout: Duration::from_secs(5),
        },
        endpoints: vec![EndpointConfig {
            id: "svc".into(),
            name: "Service".into(),
            base_url: None,
            api_key_hash: cheap_hash(SECRET),
        }],
        token,
        ..Config::default()
    }
}

async fn harness_with_base(base_url: String) -> Harness {
    harness_with(base_url, |_| {}).await
}

async fn harness_with(base_url: String, tweak: impl FnOnce(&mut Config)) -> Harness {
    let key = KeyPair::generate().unwrap();
    let token = TokenConfig {
        public_key: Some(key.public_key_pem()),
        algorithm: "ES256".into(),
        issuer: Some(ISSUER.into()),
        audience: Some(AUDIENCE.into()),
        ..TokenConfig::default()
    };
    let mut cfg = config(base_url, token);
    tweak(&mut cfg);
    let state = Arc::new(AppState::from_config(&cfg).await.unwrap());
    Harness {
        app: create_router(Arc::clone(&state)),
        state,
        key,
    }
}

async fn harness() -> Harness {
    harness_with_base(spawn_backend().await).await
}

fn items_claims() -> Value {
    json!({
        "iss": ISSUER,
        "aud": AUDIENCE,
        "sub": "agent-7",
        "jti": "tok-1",
        "exp": now() + 600,
        "iat": now(),
        "policies": [{
            "endpoint": "svc",
            "permissions": {"read": ["/api/items", "/api/items/*"]},
            "scopes": []
        }]
    })
}

impl Harness {
    fn sign(&self, claims: &Value) -> String {
        let encoding = EncodingKey::from_ec_pem(self.key.serialize_pem().as_bytes()).unwrap();
        jsonwebtoken::encode(&Header::new(Algorithm::ES256), claims, &encoding).unwrap()
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn proxy(&self, method: Method, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-api-key", SECRET);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    fn audit(&self) -> Vec<AuditRecord> {
        self.state.audit.recent(usize::MAX)
    }

    fn last_audit(&self) -> AuditRecord {
        self.audit().pop().expect("no audit record")
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn authorized(method: Method, uri: &str, token: &str, body: Body) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", SECRET)
        .header("authorization", format!("Bearer {token}"))
        .body(body)
        .unwrap()
}

fn create_claims() -> Value {
    let mut claims = items_claims();
    claims["policies"] = json!([{"endpoint": "svc", "scopes": ["create", "read"]}]);
    claims
}

// ─── authorization pipeline ──────────────────────────────────────────────────

#[tokio::test]
async fn granted_read_is_forwarded_and_audited() {
    // GIVEN: a token granting read on /api/items and its children
    let h = harness().await;
    let token = h.sign(&items_claims());

    // WHEN: reading an item
    let (status, body) = h
        .proxy(Method::GET, "/proxy/svc/api/items/42", Some(&token))
        .await;

    // THEN: the downstream answer is relayed
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["method"], "GET");
    assert_eq!(body["path"], "/api/items/42");

    // AND: exactly one GRANTED record with the evaluated resource
    let audit = h.audit();
    assert_eq!(audit.len(), 1);
    let record = &audit[0];
    assert_eq!(record.outcome, AuditOutcome::Granted);
    assert_eq!(record.status, 200);
    assert_eq!(record.agent_id, "agent-7");
    assert_eq!(record.endpoint_id, "svc");
    assert!(!record.mtls_verified);
    let summary = record.token_summary.as_ref().unwrap();
    assert_eq!(summary.resource.as_deref(), Some("/api/items/42"));
    assert_eq!(summary.token_id.as_deref(), Some("tok-1"));
    assert_eq!(summary.issuer.as_deref(), Some(ISSUER));
}

#[tokio::test]
async fn delete_without_permission_is_denied() {
    let h = harness().await;
    let token = h.sign(&items_claims());

    let (status, body) = h
        .proxy(Method::DELETE, "/proxy/svc/api/items/42", Some(&token))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "AuthorizationError");
    assert_eq!(body["requiredPermission"], "delete");

    let record = h.last_audit();
    assert_eq!(record.outcome, AuditOutcome::Denied);
    assert!(record.message.contains("delete"), "{}", record.message);
}

#[tokio::test]
async fn missing_token_is_rejected_before_policy_lookup() {
    let h = harness().await;

    let (status, body) = h.proxy(Method::GET, "/proxy/svc/api/items/42", None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "AuthenticationError");
    let record = h.last_audit();
    assert_eq!(record.outcome, AuditOutcome::Denied);
    assert_eq!(record.message, "token missing");
    assert!(record.token_summary.is_none());
}

#[tokio::test]
async fn access_token_header_is_accepted() {
    let h = harness().await;
    let token = h.sign(&items_claims());
    let request = Request::builder()
        .uri("/proxy/svc/api/items")
        .header("x-api-key", SECRET)
        .header("x-access-token", token)
        .body(Body::empty())
        .unwrap();

    let (status, body) = h.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "/api/items");
}

#[tokio::test]
async fn resource_outside_grant_is_denied_with_resource() {
    let h = harness().await;
    let token = h.sign(&items_claims());

    let (status, body) = h
        .proxy(Method::GET, "/proxy/svc/api/orders/1", Some(&token))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["resource"], "/api/orders/1");
}

#[tokio::test]
async fn expired_token_is_rejected_without_leaking_detail() {
    let h = harness().await;
    let mut claims = items_claims();
    claims["exp"] = json!(now() - 3600);
    let token = h.sign(&claims);

    let (status, body) = h
        .proxy(Method::GET, "/proxy/svc/api/items/42", Some(&token))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "invalid or expired token");
    let record = h.last_audit();
    assert_eq!(record.outcome, AuditOutcome::Denied);
    assert!(record.message.contains("token expired"), "{}", record.message);
}

#[tokio::test]
async fn shared_secret_failures_map_to_401_403_404() {
    let h = harness().await;
    let token = h.sign(&items_claims());

    // Missing secret
    let request = Request::builder()
        .uri("/proxy/svc/api/items")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    assert_eq!(h.send(request).await.0, StatusCode::UNAUTHORIZED);

    // Wrong secret for a known endpoint
    let request = Request::builder()
        .uri("/proxy/svc/api/items")
        .header("x-api-key", "wrong")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    assert_eq!(h.send(request).await.0, StatusCode::FORBIDDEN);

    // Unknown endpoint
    let (status, body) = h
        .proxy(Method::GET, "/proxy/nope/api/items", Some(&token))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NotFoundError");

    // Every rejection was audited
    let audit = h.audit();
    assert_eq!(audit.len(), 3);
    assert!(audit.iter().all(|r| r.outcome == AuditOutcome::Denied));
}

#[tokio::test]
async fn unsupported_method_is_405() {
    let h = harness().await;
    let token = h.sign(&items_claims());

    let (status, body) = h
        .proxy(Method::OPTIONS, "/proxy/svc/api/items", Some(&token))
        .await;

    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["error"], "MethodNotAllowed");
    assert_eq!(h.last_audit().outcome, AuditOutcome::Denied);
}

#[tokio::test]
async fn repeated_request_yields_same_decision_and_two_records() {
    let h = harness().await;
    let token = h.sign(&items_claims());

    let first = h.proxy(Method::GET, "/proxy/svc/api/items/7", Some(&token)).await;
    let second = h.proxy(Method::GET, "/proxy/svc/api/items/7", Some(&token)).await;

    assert_eq!(first, second);
    let audit = h.audit();
    assert_eq!(audit.len(), 2);
    assert_ne!(audit[0].id, audit[1].id);
    assert!(audit[0].timestamp <= audit[1].timestamp);
}

#[tokio::test]
async fn query_string_and_body_are_forwarded() {
    // GIVEN: a token with scope-based create permission
    let h = harness().await;
    let token = h.sign(&create_claims());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/proxy/svc/api/items?dry_run=true")
        .header("x-api-key", SECRET)
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(r#"{"name":"widget"}"#))
        .unwrap();

    let (status, body) = h.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["method"], "POST");
    assert_eq!(body["query"], "dry_run=true");
    assert_eq!(body["body"], r#"{"name":"widget"}"#);
}

#[tokio::test]
async fn endpoint_root_is_proxied() {
    let h = harness().await;
    let mut claims = items_claims();
    claims["policies"] = json!([{"endpoint": "svc", "permissions": {"read": true}}]);
    let token = h.sign(&claims);

    let (status, body) = h.proxy(Method::GET, "/proxy/svc", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "/");
}

#[tokio::test]
async fn request_id_header_matches_audit_record() {
    let h = harness().await;
    let token = h.sign(&items_claims());
    let request = Request::builder()
        .uri("/proxy/svc/api/items")
        .header("x-api-key", SECRET)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();

    let response = h.app.clone().oneshot(request).await.unwrap();
    let request_id = response.headers()["x-request-id"].to_str().unwrap().to_string();
    assert_eq!(h.last_audit().id, request_id);
}

#[tokio::test]
async fn unreachable_upstream_is_500_and_audited_as_error() {
    let h = harness_with_base(dead_address().await).await;
    let token = h.sign(&items_claims());

    let (status, body) = h
        .proxy(Method::GET, "/proxy/svc/api/items", Some(&token))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "UpstreamError");
    assert_eq!(h.last_audit().outcome, AuditOutcome::Error);
}

#[tokio::test]
async fn unconfigured_verifier_fails_closed_with_503() {
    // GIVEN: no token key material at all
    let cfg = config(spawn_backend().await, TokenConfig::default());
    let state = Arc::new(AppState::from_config(&cfg).await.unwrap());
    let app = create_router(Arc::clone(&state));

    // WHEN: a request with a correct shared secret arrives
    let request = Request::builder()
        .uri("/proxy/svc/api/items")
        .header("x-api-key", SECRET)
        .header("authorization", "Bearer anything")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    // THEN: 503 and an ERROR record
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let records = state.audit.recent(10);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, AuditOutcome::Error);
}

#[tokio::test]
async fn dot_segments_cannot_escape_the_granted_prefix() {
    // GIVEN: a token limited to /api/items and its children
    let h = harness().await;
    let token = h.sign(&items_claims());

    // WHEN: the path climbs out of the grant, literally or percent-encoded
    for uri in [
        "/proxy/svc/api/items/../admin/secrets",
        "/proxy/svc/api/items/%2e%2e/admin",
        "/proxy/svc/api/items/./42",
    ] {
        let (status, body) = h.proxy(Method::GET, uri, Some(&token)).await;

        // THEN: denied before anything is forwarded
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(body["error"], "AuthorizationError");
        assert!(body.get("method").is_none(), "{uri} reached the backend");
    }

    let audit = h.audit();
    assert_eq!(audit.len(), 3);
    assert!(audit.iter().all(|r| r.outcome == AuditOutcome::Denied));
    assert_eq!(audit[0].path, "/api/items/../admin/secrets");
    assert_eq!(audit[1].path, "/api/items/../admin");
}

#[tokio::test]
async fn decoded_query_and_fragment_markers_stay_in_the_path() {
    let h = harness().await;
    let token = h.sign(&items_claims());

    // GIVEN: encoded '?' and '#' inside a granted path segment
    let (status, body) = h
        .proxy(Method::GET, "/proxy/svc/api/items/a%3Fadmin=1", Some(&token))
        .await;
    // THEN: the downstream sees the same single segment, and no query
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "/api/items/a%3Fadmin=1");
    assert_eq!(body["query"], Value::Null);

    let (status, body) = h
        .proxy(Method::GET, "/proxy/svc/api/items/a%23frag?page=2", Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "/api/items/a%23frag");
    assert_eq!(body["query"], "page=2");

    let audit = h.audit();
    assert_eq!(audit[0].path, "/api/items/a?admin=1");
    assert_eq!(audit[1].path, "/api/items/a#frag");
}

#[tokio::test]
async fn oversized_body_is_413_and_audited() {
    // GIVEN: a 16-byte body limit and a token allowed to create
    let h = harness_with(spawn_backend().await, |cfg| cfg.server.max_body_size = 16).await;
    let token = h.sign(&create_claims());

    // WHEN: a larger body is posted
    let request = authorized(
        Method::POST,
        "/proxy/svc/api/items",
        &token,
        Body::from("x".repeat(64)),
    );
    let (status, body) = h.send(request).await;

    // THEN: 413 rendered like every other rejection, one DENIED record
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"], "PayloadTooLarge");
    let audit = h.audit();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].outcome, AuditOutcome::Denied);
    assert_eq!(audit[0].status, 413);
}

#[tokio::test]
async fn disconnect_while_body_is_read_leaves_one_granted_record() {
    // GIVEN: an authorized POST whose body never arrives
    let h = harness().await;
    let token = h.sign(&create_claims());
    let stalled = Body::from_stream(futures::stream::pending::<Result<Bytes, std::io::Error>>());
    let request = authorized(Method::POST, "/proxy/svc/api/items", &token, stalled);

    // WHEN: the client goes away while the proxy waits for the body
    let app = h.app.clone();
    let task = tokio::spawn(async move { app.oneshot(request).await });
    tokio::time::sleep(Duration::from_millis(500)).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    // THEN: the grant was still recorded, exactly once
    let audit = h.audit();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].outcome, AuditOutcome::Granted);
    assert_eq!(audit[0].status, 499);
    assert_eq!(audit[0].message, "client disconnected before upstream response");
}

#[tokio::test]
async fn peer_certificate_lands_in_audit_record() {
    // GIVEN: a connection that presented a verified client certificate
    let h = harness().await;
    let token = h.sign(&items_claims());

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "agent-7");
    params.distinguished_name = dn;
    params.subject_alt_names =
        vec![SanType::URI(Ia5String::try_from("spiffe://armoriq.test/agent/7").unwrap())];
    let cert = params.self_signed(&KeyPair::generate().unwrap()).unwrap();
    let der = cert.der().to_vec();
    let summary = CertSummary::from_der(&der).unwrap();

    let mut request = authorized(Method::GET, "/proxy/svc/api/items/1", &token, Body::empty());
    request.extensions_mut().insert(PeerIdentity {
        certificate: Some(summary.clone()),
        verified: true,
    });

    // WHEN: the request is proxied
    let (status, _) = h.send(request).await;

    // THEN: the record carries the certificate summary
    assert_eq!(status, StatusCode::OK);
    let record = h.last_audit();
    assert!(record.mtls_verified);
    assert_eq!(record.cert_summary.as_ref(), Some(&summary));
    assert_eq!(
        record.cert_summary.unwrap().display_name,
        "spiffe://armoriq.test/agent/7"
    );

    let (_, logs) = h.send(get("/api/audit-logs")).await;
    let serialized = &logs["records"][0];
    assert_eq!(serialized["mtlsVerified"], true);
    assert_eq!(serialized["certSummary"]["fingerprint"], summary.fingerprint.as_str());
}

// ─── admin surface ───────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_counts_and_verifier_mode() {
    let h = harness().await;
    h.proxy(Method::GET, "/proxy/svc/api/items", None).await;

    let (status, body) = h.send(get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["endpoints"], 1);
    assert_eq!(body["auditRecords"], 1);
    assert_eq!(body["tokenVerifier"], "public_key");
}

#[tokio::test]
async fn audit_logs_return_recent_window_and_total() {
    let h = harness().await;
    for _ in 0..3 {
        h.proxy(Method::GET, "/proxy/svc/api/items", None).await;
    }

    let (status, body) = h.send(get("/api/audit-logs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    let records = body["records"].as_array().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["outcome"], "DENIED");
    assert_eq!(records[0]["endpointId"], "svc");
}

#[tokio::test]
async fn endpoints_listing_hides_secret_hash() {
    let h = harness().await;

    let (status, body) = h.send(get("/api/endpoints")).await;
    assert_eq!(status, StatusCode::OK);
    let endpoints = body["endpoints"].as_array().unwrap();
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0]["id"], "svc");
    assert_eq!(endpoints[0]["name"], "Service");
    assert!(!body.to_string().contains("argon2"));
}

#[tokio::test]
async fn discovery_document_is_served_and_merged() {
    // GIVEN: a discovery document declaring a second endpoint and a tool
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("mcp.json");
    let doc = json!({
        "name": "demo",
        "version": "1.0",
        "endpoints": [{"id": "docs", "name": "Docs", "api_key_hash": cheap_hash("d")}],
        "tools": [{"name": "search"}],
        "resources": [],
        "prompts": [{"name": "summarize"}]
    });
    std::fs::write(&path, doc.to_string()).unwrap();

    let mut cfg = config(spawn_backend().await, TokenConfig::default());
    cfg.discovery.path = Some(path.to_string_lossy().into_owned());
    let state = Arc::new(AppState::from_config(&cfg).await.unwrap());
    let app = create_router(state);

    // WHEN: the discovery routes are read
    let body = |res: axum::response::Response| async move {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice::<Value>(&bytes).unwrap()
    };
    let mcp = body(app.clone().oneshot(get("/api/mcp")).await.unwrap()).await;
    let tools = body(app.clone().oneshot(get("/api/mcp/tools")).await.unwrap()).await;
    let prompts = body(app.clone().oneshot(get("/api/mcp/prompts")).await.unwrap()).await;
    let endpoints = body(app.oneshot(get("/api/endpoints")).await.unwrap()).await;

    // THEN: the document is mirrored without hashes and its endpoint registered
    assert_eq!(mcp["name"], "demo");
    assert!(!mcp.to_string().contains("argon2"));
    assert_eq!(tools, json!([{"name": "search"}]));
    assert_eq!(prompts[0]["name"], "summarize");
    assert_eq!(endpoints["endpoints"].as_array().unwrap().len(), 2);
}
