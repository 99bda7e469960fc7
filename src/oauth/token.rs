use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::Value;

use crate::error::{ApiError, ApiResult, ErrorResponse, FieldIssue};
use crate::host_api::middleware::RequestId;
use crate::AppState;

use super::types::{TokenRequest, TokenResponse};

/// Client-credentials token endpoint.
///
/// `POST /auth/token` (application/json)
///
/// Exchanges a registered client's id and secret for a one-hour Bearer token
/// carrying the requested scopes, provided every one of them is allowed for
/// that client.
#[utoipa::path(
    post,
    path = "/auth/token",
    tag = "auth",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 400, description = "Malformed request body", body = ErrorResponse),
        (status = 401, description = "Invalid client credentials", body = ErrorResponse),
        (status = 403, description = "Scope not allowed for this client", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse)
    )
)]
pub async fn issue_token(
    State(state): State<AppState>,
    request_id: RequestId,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<TokenResponse>> {
    let Json(body) = body.map_err(|rejection| {
        ApiError::validation(
            "Invalid request body",
            vec![FieldIssue::new("", rejection.body_text())],
        )
        .for_request(&request_id)
    })?;

    let request = TokenRequest::from_json(&body).map_err(|issues| {
        ApiError::validation("Invalid request body", issues).for_request(&request_id)
    })?;

    let issued = state
        .issuer
        .issue(&request, Utc::now().timestamp())
        .map_err(|e| ApiError::from(e).for_request(&request_id))?;

    Ok(Json(issued.response))
}
