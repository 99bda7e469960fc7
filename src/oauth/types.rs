use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::FieldIssue;

/// Fixed lifetime of every access token.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 3600;

pub const TOKEN_TYPE: &str = "Bearer";

const MIN_SECRET_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Token endpoint request
// ---------------------------------------------------------------------------

/// Inbound body of `POST /auth/token`.
#[derive(Clone, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    #[schema(min_length = 1)]
    pub client_id: String,
    #[schema(min_length = 8)]
    pub client_secret: String,
    /// Requested scopes, in the order they should appear on the token.
    #[schema(min_items = 1)]
    pub scope: Vec<String>,
}

impl std::fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRequest")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scope", &self.scope)
            .finish()
    }
}

impl TokenRequest {
    /// Decode and validate an untyped body, reporting every violated field
    /// rather than stopping at the first.
    pub fn from_json(body: &Value) -> Result<Self, Vec<FieldIssue>> {
        let Some(obj) = body.as_object() else {
            return Err(vec![FieldIssue::new(
                "",
                format!("Expected object, received {}", json_type(body)),
            )]);
        };

        let mut issues = Vec::new();

        let client_id = string_field(obj.get("clientId"), "clientId", &mut issues);
        if let Some(id) = &client_id {
            if let Some(msg) = check_client_id(id) {
                issues.push(FieldIssue::new("clientId", msg));
            }
        }

        let client_secret = string_field(obj.get("clientSecret"), "clientSecret", &mut issues);
        if let Some(secret) = &client_secret {
            if let Some(msg) = check_client_secret(secret) {
                issues.push(FieldIssue::new("clientSecret", msg));
            }
        }

        let scope = match obj.get("scope") {
            None => {
                issues.push(FieldIssue::new("scope", "Required"));
                None
            }
            Some(Value::Array(items)) => {
                let mut scope = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::String(s) => scope.push(s.clone()),
                        other => issues.push(FieldIssue::new(
                            format!("scope.{}", i),
                            format!("Expected string, received {}", json_type(other)),
                        )),
                    }
                }
                if let Some(msg) = check_scope(items.as_slice()) {
                    issues.push(FieldIssue::new("scope", msg));
                }
                Some(scope)
            }
            Some(other) => {
                issues.push(FieldIssue::new(
                    "scope",
                    format!("Expected array, received {}", json_type(other)),
                ));
                None
            }
        };

        match (client_id, client_secret, scope) {
            (Some(client_id), Some(client_secret), Some(scope)) if issues.is_empty() => Ok(Self {
                client_id,
                client_secret,
                scope,
            }),
            _ => Err(issues),
        }
    }

    /// Length rules for an already-typed request.
    pub fn validate(&self) -> Result<(), Vec<FieldIssue>> {
        let issues: Vec<FieldIssue> = [
            ("clientId", check_client_id(&self.client_id)),
            ("clientSecret", check_client_secret(&self.client_secret)),
            ("scope", check_scope(self.scope.as_slice())),
        ]
        .into_iter()
        .filter_map(|(path, msg)| msg.map(|m| FieldIssue::new(path, m)))
        .collect();

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

fn check_client_id(id: &str) -> Option<&'static str> {
    id.is_empty().then_some("clientId is required")
}

// Length is in Unicode scalar values, so a character outside the BMP counts
// once rather than as two UTF-16 units.
fn check_client_secret(secret: &str) -> Option<&'static str> {
    (secret.chars().count() < MIN_SECRET_LEN)
        .then_some("clientSecret must be at least 8 characters")
}

fn check_scope<T>(scope: &[T]) -> Option<&'static str> {
    scope.is_empty().then_some("at least one scope is required")
}

fn string_field(value: Option<&Value>, path: &str, issues: &mut Vec<FieldIssue>) -> Option<String> {
    match value {
        None => {
            issues.push(FieldIssue::new(path, "Required"));
            None
        }
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            issues.push(FieldIssue::new(
                path,
                format!("Expected string, received {}", json_type(other)),
            ));
            None
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Token endpoint response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    /// Always `Bearer`.
    pub token_type: String,
    /// Seconds until the token expires.
    pub expires_in: i64,
    pub scope: Vec<String>,
}

// ---------------------------------------------------------------------------
// Signed claims
// ---------------------------------------------------------------------------

/// Claims bound together by the token signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// The client id the token was issued to.
    pub sub: String,
    pub scope: Vec<String>,
    pub iat: i64,
    pub exp: i64,
}

impl TokenClaims {
    pub fn new(sub: String, scope: Vec<String>, now: i64) -> Self {
        Self {
            sub,
            scope,
            iat: now,
            exp: now + ACCESS_TOKEN_TTL_SECS,
        }
    }
}

/// Identity attached to a request once the gate lets it through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub subject: String,
    pub granted_scopes: BTreeSet<String>,
}

impl AuthContext {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.granted_scopes.contains(scope)
    }
}
