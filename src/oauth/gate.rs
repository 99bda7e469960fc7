//! Bearer-token verification and required-scope enforcement.
//!
//! A token moves through `Unverified -> SignatureValid -> ShapeValid ->
//! Authorized`; every failure is terminal for the request. Signature and
//! expiry failures share one external message, as do payload-shape failures,
//! while [`GateRejection`] keeps the internal reason for the logs.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde_json::Value;

use crate::error::ApiError;
use crate::host_api::middleware::RequestId;

use super::observer::{AuthDecision, AuthObserver};
use super::signing::{TokenSigner, VerifyError};
use super::types::{AuthContext, TokenClaims};
use super::validation::{bearer_token, BearerToken};

pub const INVALID_TOKEN_MESSAGE: &str = "Invalid or expired token";
pub const INVALID_PAYLOAD_MESSAGE: &str = "Invalid token payload";

/// Scopes an endpoint declares at route registration. Every one of them must
/// be granted; extra granted scopes are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredScopes(Arc<[String]>);

impl RequiredScopes {
    /// Duplicates are dropped; declaration order is kept for messages.
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = Vec::new();
        for scope in scopes {
            let scope = scope.into();
            if !seen.contains(&scope) {
                seen.push(scope);
            }
        }
        Self(seen.into())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_satisfied_by(&self, granted: &BTreeSet<String>) -> bool {
        self.0.iter().all(|s| granted.contains(s))
    }
}

impl fmt::Display for RequiredScopes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(", "))
    }
}

/// Why the gate refused a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    /// No `Authorization: Bearer` header.
    MissingToken,
    /// Signature, format or expiry.
    Token(VerifyError),
    /// Signature was fine but the claims are not the expected shape.
    Payload(String),
    InsufficientScope {
        subject: String,
        granted: BTreeSet<String>,
        required: RequiredScopes,
    },
}

impl From<GateRejection> for ApiError {
    fn from(rejection: GateRejection) -> Self {
        match rejection {
            GateRejection::MissingToken | GateRejection::Token(_) => {
                ApiError::Unauthorized(INVALID_TOKEN_MESSAGE.into())
            }
            GateRejection::Payload(_) => ApiError::Unauthorized(INVALID_PAYLOAD_MESSAGE.into()),
            GateRejection::InsufficientScope { required, .. } => {
                ApiError::Forbidden(format!("Required scopes: {}", required))
            }
        }
    }
}

pub struct ScopeGate {
    signer: Arc<TokenSigner>,
    observer: Arc<dyn AuthObserver>,
}

impl ScopeGate {
    pub fn new(signer: Arc<TokenSigner>, observer: Arc<dyn AuthObserver>) -> Self {
        Self { signer, observer }
    }

    /// Decide whether `token` grants every scope in `required` at `now`.
    pub fn authorize(
        &self,
        token: &str,
        required: &RequiredScopes,
        now: i64,
    ) -> Result<AuthContext, GateRejection> {
        self.authorize_bearer(BearerToken::Present(token), required, now)
    }

    /// Same as [`ScopeGate::authorize`], but a request without a bearer token
    /// is rejected here too so the observer sees every gated request.
    pub fn authorize_bearer(
        &self,
        bearer: BearerToken<'_>,
        required: &RequiredScopes,
        now: i64,
    ) -> Result<AuthContext, GateRejection> {
        let result = match bearer {
            BearerToken::Missing => Err(GateRejection::MissingToken),
            BearerToken::Present(token) => self.check(token, required, now),
        };
        self.report(&result, required);
        result
    }

    fn check(&self, token: &str, required: &RequiredScopes, now: i64) -> Result<AuthContext, GateRejection> {
        let raw = self.signer.verify(token, now).map_err(GateRejection::Token)?;
        let claims = decode_claims(raw)?;

        let granted: BTreeSet<String> = claims.scope.into_iter().collect();
        if !required.is_satisfied_by(&granted) {
            return Err(GateRejection::InsufficientScope {
                subject: claims.sub,
                granted,
                required: required.clone(),
            });
        }

        Ok(AuthContext {
            subject: claims.sub,
            granted_scopes: granted,
        })
    }

    fn report(&self, result: &Result<AuthContext, GateRejection>, required: &RequiredScopes) {
        let decision = match result {
            Ok(ctx) => AuthDecision {
                subject: Some(&ctx.subject),
                granted: Some(&ctx.granted_scopes),
                required: required.as_slice(),
                authorized: true,
            },
            Err(GateRejection::InsufficientScope { subject, granted, .. }) => AuthDecision {
                subject: Some(subject),
                granted: Some(granted),
                required: required.as_slice(),
                authorized: false,
            },
            Err(_) => AuthDecision {
                subject: None,
                granted: None,
                required: required.as_slice(),
                authorized: false,
            },
        };
        self.observer.authorization(&decision);
    }
}

/// Typed decode of verified claims. Unknown extra claims are ignored.
fn decode_claims(raw: Value) -> Result<TokenClaims, GateRejection> {
    serde_json::from_value(raw).map_err(|e| GateRejection::Payload(e.to_string()))
}

// ---------------------------------------------------------------------------
// Axum middleware
// ---------------------------------------------------------------------------

/// Gate bound to one endpoint's required scopes.
#[derive(Clone)]
pub struct ScopeGuard {
    pub gate: Arc<ScopeGate>,
    pub required: RequiredScopes,
}

impl ScopeGuard {
    pub fn new(gate: Arc<ScopeGate>, required: RequiredScopes) -> Self {
        Self { gate, required }
    }
}

/// Runs before a protected handler. On success the handler can extract
/// `Extension<AuthContext>`; on failure it is never called.
pub async fn require_scopes(
    State(guard): State<ScopeGuard>,
    request_id: RequestId,
    mut req: Request,
    next: Next,
) -> Response {
    let outcome = guard.gate.authorize_bearer(
        bearer_token(req.headers()),
        &guard.required,
        Utc::now().timestamp(),
    );

    match outcome {
        Ok(ctx) => {
            tracing::debug!(
                request_id = request_id.as_str(),
                sub = %ctx.subject,
                "Request authorized"
            );
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(rejection) => {
            log_rejection(&request_id, &rejection);
            ApiError::from(rejection).for_request(&request_id).into_response()
        }
    }
}

fn log_rejection(request_id: &RequestId, rejection: &GateRejection) {
    let request_id = request_id.as_str();
    match rejection {
        GateRejection::MissingToken => {
            tracing::warn!(request_id, reason = "missing_token", "JWT verification failed");
        }
        GateRejection::Token(err) => {
            let reason = match err {
                VerifyError::Malformed => "malformed",
                VerifyError::BadSignature => "bad_signature",
                VerifyError::Expired { .. } => "expired",
            };
            tracing::warn!(request_id, reason, error = %err, "JWT verification failed");
        }
        GateRejection::Payload(err) => {
            tracing::warn!(request_id, error = %err, "Invalid JWT payload shape");
        }
        GateRejection::InsufficientScope {
            subject,
            granted,
            required,
        } => {
            tracing::warn!(
                request_id,
                sub = %subject,
                scope = ?granted,
                required_scopes = %required,
                "Insufficient scope"
            );
        }
    }
}
