use std::collections::HashMap;

use axum::extract::rejection::QueryRejection;
use axum::extract::Query;
use axum::{Extension, Json};
use chrono::{Duration, SecondsFormat, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{ApiError, ApiResult, ErrorResponse, FieldIssue};
use crate::oauth::AuthContext;

use super::middleware::RequestId;

/// Size of the simulated collection.
pub const MOCK_TOTAL: u32 = 42;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ResourceMetadata {
    pub index: u32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// UUID v4.
    pub id: String,
    pub name: String,
    pub status: ResourceStatus,
    pub metadata: ResourceMetadata,
    /// RFC 3339 timestamp.
    pub created_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceList {
    pub data: Vec<Resource>,
    pub total: u32,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Pagination {
    /// Parse `page` / `pageSize` from raw query values. Both default when
    /// absent; both must be positive integers and `pageSize` at most 100.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, Vec<FieldIssue>> {
        let mut issues = Vec::new();

        let page = match params.get("page") {
            None => Some(1),
            Some(raw) => record(positive_int(raw, None), "page", &mut issues),
        };
        let page_size = match params.get("pageSize") {
            None => Some(DEFAULT_PAGE_SIZE),
            Some(raw) => record(positive_int(raw, Some(MAX_PAGE_SIZE)), "pageSize", &mut issues),
        };

        match (page, page_size) {
            (Some(page), Some(page_size)) => Ok(Self { page, page_size }),
            _ => Err(issues),
        }
    }
}

fn record(result: Result<u32, String>, path: &str, issues: &mut Vec<FieldIssue>) -> Option<u32> {
    result.map_err(|msg| issues.push(FieldIssue::new(path, msg))).ok()
}

/// Coerce a query value the way a lenient number parser would: blank is 0,
/// anything non-numeric is rejected, fractions are rejected.
fn positive_int(raw: &str, max: Option<u32>) -> Result<u32, String> {
    let trimmed = raw.trim();
    let n: f64 = if trimmed.is_empty() {
        0.0
    } else {
        trimmed
            .parse()
            .map_err(|_| "Expected number, received nan".to_string())?
    };

    if !n.is_finite() {
        return Err("Expected number, received nan".into());
    }
    if n.fract() != 0.0 {
        return Err("Expected integer, received float".into());
    }
    if n <= 0.0 {
        return Err("Number must be greater than 0".into());
    }
    if let Some(max) = max {
        if n > max as f64 {
            return Err(format!("Number must be less than or equal to {}", max));
        }
    }
    if n > u32::MAX as f64 {
        return Err("Number is too large".into());
    }
    Ok(n as u32)
}

fn generate_mock_resources(count: u32) -> Vec<Resource> {
    let now = Utc::now();
    (0..count)
        .map(|i| Resource {
            id: uuid::Uuid::new_v4().to_string(),
            name: format!("Resource {}", i + 1),
            status: if i % 3 == 0 {
                ResourceStatus::Inactive
            } else {
                ResourceStatus::Active
            },
            metadata: ResourceMetadata { index: i },
            created_at: (now - Duration::days(i as i64)).to_rfc3339_opts(SecondsFormat::Millis, true),
        })
        .collect()
}

/// List resources visible to the caller.
///
/// Requires a token granting `resources:read`.
#[utoipa::path(
    get,
    path = "/api/resources",
    tag = "resources",
    security(("bearer_auth" = ["resources:read"])),
    params(
        ("page" = Option<u32>, Query, description = "1-based page number (default 1)"),
        ("pageSize" = Option<u32>, Query, description = "Items per page, at most 100 (default 20)")
    ),
    responses(
        (status = 200, description = "Page of resources", body = ResourceList),
        (status = 400, description = "Invalid query parameters", body = ErrorResponse),
        (status = 401, description = "Missing, invalid or expired token", body = ErrorResponse),
        (status = 403, description = "Token lacks resources:read", body = ErrorResponse)
    )
)]
pub async fn list_resources(
    Extension(auth): Extension<AuthContext>,
    request_id: RequestId,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
) -> ApiResult<Json<ResourceList>> {
    let invalid = |details: Vec<FieldIssue>| {
        ApiError::validation("Invalid query parameters", details).for_request(&request_id)
    };

    let Query(params) =
        query.map_err(|rejection| invalid(vec![FieldIssue::new("", rejection.body_text())]))?;
    let Pagination { page, page_size } = Pagination::from_params(&params).map_err(invalid)?;

    tracing::debug!(sub = %auth.subject, page, page_size, "Listing resources");

    Ok(Json(ResourceList {
        data: generate_mock_resources(page_size.min(MOCK_TOTAL)),
        total: MOCK_TOTAL,
        page,
        page_size,
    }))
}
