use std::sync::Arc;

use crate::error::{ApiError, FieldIssue};

use super::observer::AuthObserver;
use super::registry::ClientRegistry;
use super::signing::TokenSigner;
use super::types::{TokenClaims, TokenRequest, TokenResponse, ACCESS_TOKEN_TTL_SECS, TOKEN_TYPE};

/// Why an exchange was refused.
#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("invalid token request")]
    Invalid(Vec<FieldIssue>),

    /// Unknown client or wrong secret. Deliberately one variant.
    #[error("invalid client credentials")]
    BadCredentials,

    #[error("scopes not allowed: {}", .0.join(", "))]
    ScopeNotAllowed(Vec<String>),

    #[error("token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

impl From<IssueError> for ApiError {
    fn from(err: IssueError) -> Self {
        match err {
            IssueError::Invalid(details) => ApiError::validation("Invalid request body", details),
            IssueError::BadCredentials => ApiError::Unauthorized("Invalid client credentials".into()),
            IssueError::ScopeNotAllowed(scopes) => ApiError::Forbidden(format!(
                "Scopes not allowed for this client: {}",
                scopes.join(", ")
            )),
            IssueError::Signing(e) => ApiError::Internal(format!("token signing failed: {}", e)),
        }
    }
}

/// A freshly signed token plus the claims it carries.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub claims: TokenClaims,
    pub response: TokenResponse,
}

/// Exchanges client credentials for signed, one-hour access tokens.
pub struct TokenIssuer {
    registry: Arc<dyn ClientRegistry>,
    signer: Arc<TokenSigner>,
    observer: Arc<dyn AuthObserver>,
}

impl TokenIssuer {
    pub fn new(
        registry: Arc<dyn ClientRegistry>,
        signer: Arc<TokenSigner>,
        observer: Arc<dyn AuthObserver>,
    ) -> Self {
        Self {
            registry,
            signer,
            observer,
        }
    }

    /// Validate, authenticate, check scopes, sign. The token scope is the
    /// requested scope verbatim, order included.
    pub fn issue(&self, request: &TokenRequest, now: i64) -> Result<IssuedToken, IssueError> {
        request.validate().map_err(IssueError::Invalid)?;

        let client = match self.registry.lookup(&request.client_id) {
            Some(client) if client.secret_matches(&request.client_secret) => client,
            _ => {
                tracing::warn!(client_id = %request.client_id, "Invalid client credentials");
                return Err(IssueError::BadCredentials);
            }
        };

        let disallowed = client.disallowed_scopes(&request.scope);
        if !disallowed.is_empty() {
            tracing::warn!(
                client_id = %request.client_id,
                rejected = ?disallowed,
                "Requested scopes not allowed for client"
            );
            return Err(IssueError::ScopeNotAllowed(
                disallowed.into_iter().map(str::to_string).collect(),
            ));
        }

        let claims = TokenClaims::new(request.client_id.clone(), request.scope.clone(), now);
        let access_token = self.signer.sign(&claims)?;

        tracing::info!(client_id = %claims.sub, scope = ?claims.scope, "Token issued");
        self.observer.token_issued(&claims.sub, &claims.scope);

        let response = TokenResponse {
            access_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: ACCESS_TOKEN_TTL_SECS,
            scope: claims.scope.clone(),
        };
        Ok(IssuedToken { claims, response })
    }
}
