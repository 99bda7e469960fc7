//! Client-credentials token issuance and scope-based authorization.
//!
//! The issuer and the gate share nothing but a [`signing::TokenSigner`]
//! built from one key; both are pure over their inputs plus `now`, so a
//! request can be abandoned at any point without cleanup.

pub mod gate;
pub mod issuer;
pub mod observer;
pub mod registry;
pub mod signing;
pub mod token;
pub mod types;
pub mod validation;

pub use gate::{GateRejection, RequiredScopes, ScopeGate};
pub use issuer::{IssueError, TokenIssuer};
pub use types::{AuthContext, TokenClaims, TokenRequest, TokenResponse};
