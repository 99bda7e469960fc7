//! End-to-end tests for the token endpoint and the scope gate.
//!
//! These drive the full router in-process: request context, rate limiting,
//! the issuer, the gate and the resource handler, exactly as wired for
//! production, with an explicit test signing key.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::{routing, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;

use platform_core::host_api::{build_router, with_service_layers};
use platform_core::host_api::rate_limit::RateLimiter;
use platform_core::oauth::observer::{AuthObserver, NoopObserver};
use platform_core::oauth::registry::StaticClientRegistry;
use platform_core::oauth::signing::{SigningKey, TokenSigner};
use platform_core::oauth::TokenClaims;
use platform_core::{AppState, ServiceInfo};

const TEST_SECRET: &[u8] = b"test-secret";

fn state(max_requests: u64, observer: Arc<dyn AuthObserver>) -> AppState {
    AppState::new(
        Arc::new(StaticClientRegistry::demo()),
        &SigningKey::new(TEST_SECRET),
        RateLimiter::new(max_requests, Duration::from_secs(60)),
        observer,
        ServiceInfo {
            name: "platform-core-test".into(),
            environment: "test".into(),
        },
    )
}

fn app_with_limit(max_requests: u64) -> Router {
    build_router(state(max_requests, Arc::new(NoopObserver)))
}

/// Counts 5xx notifications from the request layer.
#[derive(Default)]
struct FaultCounter {
    faults: AtomicUsize,
}

impl AuthObserver for FaultCounter {
    fn server_fault(&self) {
        self.faults.fetch_add(1, Ordering::SeqCst);
    }
}

fn app() -> Router {
    app_with_limit(1000)
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

async fn send(app: &Router, req: Request<Body>) -> Reply {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    Reply { status, headers, body }
}

fn token_request(body: Value) -> Request<Body> {
    Request::post("/auth/token")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn resources_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

async fn issue(app: &Router, scope: &[&str]) -> String {
    let reply = send(
        app,
        token_request(json!({
            "clientId": "client-demo",
            "clientSecret": "demo-secret-123",
            "scope": scope,
        })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK, "issue failed: {}", reply.body);
    reply.body["accessToken"].as_str().unwrap().to_string()
}

fn sign_with(secret: &[u8], claims: &TokenClaims) -> String {
    TokenSigner::new(&SigningKey::new(secret)).sign(claims).unwrap()
}

// =========================================================================
// Health
// =========================================================================

#[tokio::test]
async fn health_and_ready() {
    let app = app();

    let health = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(health.status, StatusCode::OK);
    assert_eq!(health.body["status"], "ok");
    assert!(health.body["timestamp"].is_string());

    let ready = send(&app, Request::get("/ready").body(Body::empty()).unwrap()).await;
    assert_eq!(ready.status, StatusCode::OK);
    assert_eq!(ready.body["status"], "ready");
    assert_eq!(ready.body["checks"]["server"], "ok");
}

// =========================================================================
// Token issuance
// =========================================================================

#[tokio::test]
async fn valid_credentials_return_token() {
    let reply = send(
        &app(),
        token_request(json!({
            "clientId": "client-demo",
            "clientSecret": "demo-secret-123",
            "scope": ["resources:read"],
        })),
    )
    .await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["tokenType"], "Bearer");
    assert_eq!(reply.body["expiresIn"], 3600);
    assert_eq!(reply.body["scope"], json!(["resources:read"]));
    assert!(reply.body["accessToken"].as_str().is_some_and(|t| !t.is_empty()));
    assert!(reply.headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn issued_token_carries_requested_scope_in_order() {
    let app = app();
    let token = issue(&app, &["resources:write", "resources:read"]).await;

    let raw = TokenSigner::new(&SigningKey::new(TEST_SECRET))
        .verify(&token, Utc::now().timestamp())
        .unwrap();
    let claims: TokenClaims = serde_json::from_value(raw).unwrap();
    assert_eq!(claims.sub, "client-demo");
    assert_eq!(claims.scope, vec!["resources:write", "resources:read"]);
    assert_eq!(claims.exp - claims.iat, 3600);
}

#[tokio::test]
async fn wrong_secret_returns_401() {
    let reply = send(
        &app(),
        token_request(json!({
            "clientId": "client-demo",
            "clientSecret": "wrong-secret",
            "scope": ["resources:read"],
        })),
    )
    .await;

    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["error"], "unauthorized");
}

#[tokio::test]
async fn unknown_client_is_indistinguishable_from_wrong_secret() {
    let app = app();
    let wrong_secret = send(
        &app,
        token_request(json!({
            "clientId": "client-demo",
            "clientSecret": "wrong-secret",
            "scope": ["resources:read"],
        })),
    )
    .await;
    let unknown = send(
        &app,
        token_request(json!({
            "clientId": "client-nobody",
            "clientSecret": "demo-secret-123",
            "scope": ["resources:read"],
        })),
    )
    .await;

    assert_eq!(wrong_secret.status, unknown.status);
    assert_eq!(wrong_secret.body["error"], unknown.body["error"]);
    assert_eq!(wrong_secret.body["message"], unknown.body["message"]);
    assert!(wrong_secret.body.get("details").is_none());
    assert!(unknown.body.get("details").is_none());
}

#[tokio::test]
async fn disallowed_scope_returns_403() {
    let reply = send(
        &app(),
        token_request(json!({
            "clientId": "client-demo",
            "clientSecret": "demo-secret-123",
            "scope": ["resources:read", "admin:delete"],
        })),
    )
    .await;

    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body["error"], "forbidden");
    assert_eq!(reply.body["message"], "Scopes not allowed for this client: admin:delete");
}

#[tokio::test]
async fn missing_fields_return_400_with_details() {
    let reply = send(&app(), token_request(json!({ "clientId": "client-demo" }))).await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["error"], "validation_error");
    let details = reply.body["details"].as_array().unwrap();
    assert_eq!(details.len(), 2); // clientSecret and scope
    assert_eq!(details[0]["path"], "clientSecret");
    assert_eq!(details[1]["path"], "scope");
    assert!(reply.body["requestId"].is_string());
}

#[tokio::test]
async fn unparseable_body_is_validation_error() {
    let req = Request::post("/auth/token")
        .header("content-type", "application/json")
        .body(Body::from("{ not json"))
        .unwrap();
    let reply = send(&app(), req).await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["error"], "validation_error");
    assert_eq!(reply.body["details"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn secret_never_echoed_in_error() {
    let reply = send(
        &app(),
        token_request(json!({
            "clientId": "client-demo",
            "clientSecret": "leaky-secret-value",
            "scope": ["resources:read"],
        })),
    )
    .await;
    assert!(!reply.body.to_string().contains("leaky-secret-value"));
}

// =========================================================================
// Scope gate on /api/resources
// =========================================================================

#[tokio::test]
async fn resources_without_token_returns_401() {
    let reply = send(&app(), resources_request("/api/resources", None)).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["error"], "unauthorized");
    assert_eq!(reply.body["message"], "Invalid or expired token");
}

#[tokio::test]
async fn resources_with_valid_token_returns_page() {
    let app = app();
    let token = issue(&app, &["resources:read"]).await;

    let reply = send(&app, resources_request("/api/resources?page=1&pageSize=10", Some(&token))).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["data"].as_array().unwrap().len(), 10);
    assert_eq!(reply.body["total"], 42);
    assert_eq!(reply.body["page"], 1);
    assert_eq!(reply.body["pageSize"], 10);
}

#[tokio::test]
async fn page_size_is_capped_by_collection() {
    let app = app();
    let token = issue(&app, &["resources:read"]).await;
    let reply = send(&app, resources_request("/api/resources?pageSize=100", Some(&token))).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["data"].as_array().unwrap().len(), 42);
}

#[tokio::test]
async fn resources_with_invalid_pagination_returns_400() {
    let app = app();
    let token = issue(&app, &["resources:read"]).await;

    let reply = send(&app, resources_request("/api/resources?page=0&pageSize=500", Some(&token))).await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["error"], "validation_error");
    assert_eq!(reply.body["details"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn write_only_token_is_forbidden() {
    let app = app();
    let token = issue(&app, &["resources:write"]).await;

    let reply = send(&app, resources_request("/api/resources", Some(&token))).await;

    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body["error"], "forbidden");
    assert_eq!(reply.body["message"], "Required scopes: resources:read");
    assert!(!reply.body.to_string().contains("resources:write"));
}

#[tokio::test]
async fn superset_token_is_accepted() {
    let app = app();
    let token = issue(&app, &["resources:read", "resources:write"]).await;
    let reply = send(&app, resources_request("/api/resources", Some(&token))).await;
    assert_eq!(reply.status, StatusCode::OK);
}

#[tokio::test]
async fn expired_token_returns_401() {
    let issued_at = Utc::now().timestamp() - 7200;
    let token = sign_with(
        TEST_SECRET,
        &TokenClaims::new("client-demo".into(), vec!["resources:read".into()], issued_at),
    );

    let reply = send(&app(), resources_request("/api/resources", Some(&token))).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["message"], "Invalid or expired token");
}

#[tokio::test]
async fn token_from_another_key_returns_401() {
    let token = sign_with(
        b"some-other-deployment",
        &TokenClaims::new("client-demo".into(), vec!["resources:read".into()], Utc::now().timestamp()),
    );

    let reply = send(&app(), resources_request("/api/resources", Some(&token))).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["message"], "Invalid or expired token");
}

#[tokio::test]
async fn wrongly_shaped_payload_returns_401() {
    let now = Utc::now().timestamp();
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &json!({ "sub": "client-demo", "scope": "resources:read", "iat": now, "exp": now + 60 }),
        &jsonwebtoken::EncodingKey::from_secret(TEST_SECRET),
    )
    .unwrap();

    let reply = send(&app(), resources_request("/api/resources", Some(&token))).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["error"], "unauthorized");
    assert_eq!(reply.body["message"], "Invalid token payload");
}

// =========================================================================
// Cross-cutting: request ids, rate limiting, fallback
// =========================================================================

#[tokio::test]
async fn inbound_request_id_is_echoed() {
    let req = Request::get("/api/resources")
        .header("x-request-id", "corr-42")
        .body(Body::empty())
        .unwrap();
    let reply = send(&app(), req).await;

    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["requestId"], "corr-42");
    assert_eq!(reply.headers["x-request-id"], "corr-42");
}

#[tokio::test]
async fn rate_limit_returns_429_with_retry_after() {
    let app = app_with_limit(2);
    for _ in 0..2 {
        let ok = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(ok.status, StatusCode::OK);
    }

    let limited = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.body["error"], "rate_limit_exceeded");
    let retry_after: u64 = limited.headers["retry-after"].to_str().unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry_after));
}

#[tokio::test]
async fn unknown_route_is_request_error() {
    let reply = send(&app(), Request::get("/nope").body(Body::empty()).unwrap()).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body["error"], "request_error");
}

#[tokio::test]
async fn wrong_method_is_request_error() {
    let reply = send(&app(), Request::get("/auth/token").body(Body::empty()).unwrap()).await;
    assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(reply.body["error"], "request_error");
}

async fn leaky_panic() -> &'static str {
    panic!("connection string postgres://admin:hunter2@db")
}

#[tokio::test]
async fn handler_panic_is_generic_500_with_request_id() {
    let observer = Arc::new(FaultCounter::default());
    let routes = Router::new().route(
        "/boom",
        routing::get(leaky_panic),
    );
    let app = with_service_layers(routes, state(1000, observer.clone()));

    let req = Request::get("/boom")
        .header("x-request-id", "corr-500")
        .body(Body::empty())
        .unwrap();
    let reply = send(&app, req).await;

    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply.body["error"], "internal_server_error");
    assert_eq!(reply.body["message"], "An unexpected error occurred");
    assert_eq!(reply.body["requestId"], "corr-500");
    assert_eq!(reply.headers["x-request-id"], "corr-500");
    assert!(!reply.body.to_string().contains("hunter2"));
    assert_eq!(observer.faults.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn panic_without_inbound_id_still_gets_generated_one() {
    let routes = Router::new().route(
        "/boom",
        routing::get(leaky_panic),
    );
    let app = with_service_layers(routes, state(1000, Arc::new(NoopObserver)));

    let reply = send(&app, Request::get("/boom").body(Body::empty()).unwrap()).await;

    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    let id = reply.body["requestId"].as_str().unwrap();
    assert_eq!(reply.headers["x-request-id"], id);
}
