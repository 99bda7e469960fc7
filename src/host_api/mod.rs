pub mod health;
pub mod middleware;
pub mod rate_limit;
pub mod resources;

use std::any::Any;
use std::net::SocketAddr;

use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{middleware as axum_middleware, routing, Json, Router};
use tower_http::catch_panic::CatchPanicLayer;
use tracing::Instrument;
use tower_http::cors::{Any as CorsAny, CorsLayer};
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::config::Config;
use crate::error::{ApiError, ErrorReply, ErrorResponse, FieldIssue};
use crate::oauth::gate::{require_scopes, RequiredScopes, ScopeGuard};
use crate::oauth::registry::RegistryError;
use crate::oauth::{token, TokenRequest, TokenResponse};
use crate::AppState;
use middleware::RequestId;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Platform Core API",
        description = "Client-credentials token issuance and scope-gated resources. Protected endpoints require `Authorization: Bearer <token>` obtained from POST /auth/token.",
        version = "0.1.0",
        license(name = "MIT")
    ),
    paths(
        token::issue_token,
        resources::list_resources,
        health::health,
        health::ready,
    ),
    components(schemas(
        TokenRequest,
        TokenResponse,
        ErrorResponse,
        FieldIssue,
        resources::ResourceList,
        resources::Resource,
        resources::ResourceStatus,
        resources::ResourceMetadata,
        health::Health,
        health::Readiness,
        health::ReadinessChecks,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Client-credentials token exchange"),
        (name = "resources", description = "Scope-protected resources"),
        (name = "health", description = "Liveness and readiness probes")
    )
)]
pub struct ApiDoc;

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("invalid listen address: {0}")]
    Address(#[from] std::net::AddrParseError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Protected route group: every route in `routes` requires all of `scopes`.
fn gated(state: &AppState, scopes: &[&str], routes: Router<AppState>) -> Router<AppState> {
    let guard = ScopeGuard::new(state.gate.clone(), RequiredScopes::new(scopes.iter().copied()));
    routes.route_layer(axum_middleware::from_fn_with_state(guard, require_scopes))
}

pub fn build_router(state: AppState) -> Router {
    let resource_routes = gated(
        &state,
        &["resources:read"],
        Router::new().route("/api/resources", routing::get(resources::list_resources)),
    );

    let routes = Router::new()
        // Public routes (no auth required)
        .route("/health", routing::get(health::health))
        .route("/ready", routing::get(health::ready))
        .route("/auth/token", routing::post(token::issue_token))
        .route("/api/openapi.json", routing::get(openapi_spec))
        // Scope-gated routes
        .merge(resource_routes);

    with_service_layers(routes, state)
}

/// Wrap `routes` in the fallbacks and the cross-cutting layers every
/// endpoint of the service shares.
pub fn with_service_layers(routes: Router<AppState>, state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(CorsAny)
        .allow_methods(CorsAny)
        .allow_headers(CorsAny);

    routes
        .fallback(route_not_found)
        .method_not_allowed_fallback(method_not_allowed)
        // Layers run bottom-up: request context first, then rate limiting,
        // then panic capture around the handlers.
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(axum_middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit::rate_limit_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::request_context,
        ))
        .layer(cors)
        .with_state(state)
}

/// Bind, serve until SIGINT/SIGTERM, then drain in-flight requests.
pub async fn serve(config: Config) -> Result<(), ServeError> {
    let addr = config.listen_addr()?;
    let state = AppState::from_config(&config)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Server started");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        // axum polls the signal on its own task; carry the service span over.
        .with_graceful_shutdown(shutdown_signal().instrument(tracing::Span::current()))
        .await?;

    tracing::info!("Server closed gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal = tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    };
    tracing::info!(signal, "Shutdown signal received");
}

async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn route_not_found(method: Method, uri: Uri, request_id: RequestId) -> ErrorReply {
    ApiError::Request {
        status: StatusCode::NOT_FOUND,
        message: format!("Route {}:{} not found", method, uri.path()),
    }
    .for_request(&request_id)
}

async fn method_not_allowed(method: Method, uri: Uri, request_id: RequestId) -> ErrorReply {
    ApiError::Request {
        status: StatusCode::METHOD_NOT_ALLOWED,
        message: format!("Method {} not allowed on {}", method, uri.path()),
    }
    .for_request(&request_id)
}

/// Panics become the generic 500; the payload only reaches the log.
fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "non-string panic payload".to_string()
    };
    ErrorReply {
        error: ApiError::Internal(format!("handler panicked: {}", detail)),
        request_id: RequestId::current(),
    }
    .into_response()
}
