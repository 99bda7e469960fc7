//! Bearer token extraction (RFC 6750 §2.1).
//!
//! Per RFC 7235 §2.1 the auth-scheme comparison is case-insensitive, so
//! `Bearer`, `bearer` and `BEARER` are all accepted.

use axum::http::{header, HeaderMap};

/// What the `Authorization` header carried.
#[derive(Debug, PartialEq, Eq)]
pub enum BearerToken<'a> {
    Present(&'a str),
    /// No header, a non-Bearer scheme, or an empty credential.
    Missing,
}

pub fn bearer_token(headers: &HeaderMap) -> BearerToken<'_> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() > 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(v[7..].trim())
            } else {
                None
            }
        })
        .filter(|t| !t.is_empty());

    match token {
        Some(t) => BearerToken::Present(t),
        None => BearerToken::Missing,
    }
}
