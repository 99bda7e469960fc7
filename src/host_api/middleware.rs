use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::{field, Instrument};

use crate::logging::redact_headers;
use crate::AppState;

pub const X_REQUEST_ID: &str = "x-request-id";

const MAX_INBOUND_REQUEST_ID_LEN: usize = 128;

tokio::task_local! {
    /// Id of the request whose handler chain is being polled. Lets code that
    /// never sees the request, such as the panic handler, still tag its reply.
    static CURRENT_REQUEST_ID: RequestId;
}

/// Correlation id for one request. Set by [`request_context`]; extracting it
/// without that middleware yields a fresh id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(Arc<str>);

impl RequestId {
    pub fn generate() -> Self {
        Self(Arc::from(uuid::Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id of the request currently inside [`request_context`], if any.
    pub fn current() -> Option<Self> {
        CURRENT_REQUEST_ID.try_with(Clone::clone).ok()
    }

    /// Reuse a caller-supplied id when it is short printable ASCII.
    fn from_header(value: &HeaderValue) -> Option<Self> {
        value
            .to_str()
            .ok()
            .filter(|s| {
                !s.is_empty()
                    && s.len() <= MAX_INBOUND_REQUEST_ID_LEN
                    && s.bytes().all(|b| b.is_ascii_graphic())
            })
            .map(Self::from)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestId>()
            .cloned()
            .unwrap_or_else(RequestId::generate))
    }
}

// ---------------------------------------------------------------------------
// Request context + logging (outermost layer, applies to ALL routes)
// ---------------------------------------------------------------------------

/// Assign the request id, open the request span and log both ends of the
/// request. Auth outcomes are recorded onto this span by the observer.
pub async fn request_context(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(RequestId::from_header)
        .unwrap_or_else(RequestId::generate);
    req.extensions_mut().insert(request_id.clone());

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let span = tracing::info_span!(
        "request",
        service = %state.service.name,
        env = %state.service.environment,
        request_id = request_id.as_str(),
        method = %method,
        path = %path,
        "auth.subject" = field::Empty,
        "auth.scopes" = field::Empty,
        "auth.required_scopes" = field::Empty,
        "auth.authorized" = field::Empty,
        "otel.status_code" = field::Empty,
    );

    async move {
        let started = Instant::now();
        tracing::info!("Incoming request");
        tracing::debug!(headers = %redact_headers(req.headers()), "Request headers");

        let mut response = CURRENT_REQUEST_ID
            .scope(request_id.clone(), next.run(req))
            .await;
        let status = response.status();
        if status.is_server_error() {
            state.observer.server_fault();
        }

        tracing::info!(
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );

        if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
            response.headers_mut().insert(X_REQUEST_ID, value);
        }
        response
    }
    .instrument(span)
    .await
}
