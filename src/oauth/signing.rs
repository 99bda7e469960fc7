//! HS256 token encoding and verification.
//!
//! Verification is split in two: [`TokenSigner::verify`] checks the
//! signature and expiry and hands back the raw claims; turning those into
//! [`TokenClaims`] is a separate typed step owned by the gate.

use std::collections::HashSet;
use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::Value;

use super::types::TokenClaims;

/// Symmetric key shared by issuance and verification.
#[derive(Clone)]
pub struct SigningKey(Arc<[u8]>);

impl SigningKey {
    pub fn new(secret: &[u8]) -> Self {
        Self(Arc::from(secret))
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey([REDACTED])")
    }
}

/// Why a token failed verification. Callers see one merged message; the
/// distinction exists for the logs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature does not match")]
    BadSignature,
    #[error("token expired at {exp} (now {now})")]
    Expired { exp: i64, now: i64 },
}

pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenSigner {
    pub fn new(key: &SigningKey) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the caller's clock in `verify`, and the
        // claim set is checked by the typed decode that follows.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        Self {
            encoding: EncodingKey::from_secret(&key.0),
            decoding: DecodingKey::from_secret(&key.0),
            validation,
        }
    }

    pub fn sign(&self, claims: &TokenClaims) -> Result<String, jsonwebtoken::errors::Error> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
    }

    /// Check signature and expiry. `exp <= now` is expired. A token without a
    /// numeric `exp` passes this step and is left for the shape check.
    pub fn verify(&self, token: &str, now: i64) -> Result<Value, VerifyError> {
        let data = jsonwebtoken::decode::<Value>(token, &self.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => VerifyError::BadSignature,
                _ => VerifyError::Malformed,
            })?;

        if let Some(exp) = data.claims.get("exp").and_then(Value::as_f64) {
            if exp <= now as f64 {
                return Err(VerifyError::Expired {
                    exp: exp as i64,
                    now,
                });
            }
        }

        Ok(data.claims)
    }
}
