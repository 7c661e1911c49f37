//! `Authorization` header parsing for bearer tokens.

use axum::http::{HeaderMap, header};

use super::errors::AuthErrorKind;

/// Prefix stripped from the header value before token lookup.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Whether the request carries an `Authorization` header at all.
/// The header's contents are not inspected.
pub fn supports(headers: &HeaderMap) -> bool {
    headers.contains_key(header::AUTHORIZATION)
}

/// Extract the raw token from the `Authorization` header.
///
/// A single leading `Bearer ` is removed (case-sensitive). Any other value is
/// returned as-is and will simply fail the token lookup.
pub fn extract_token(headers: &HeaderMap) -> Result<&str, AuthErrorKind> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthErrorKind::MissingToken)?
        .to_str()
        .map_err(|_| AuthErrorKind::InvalidToken)?;

    Ok(value.strip_prefix(BEARER_PREFIX).unwrap_or(value))
}
