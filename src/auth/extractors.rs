//! Axum extractors for authentication.

use axum::{extract::FromRequestParts, http::request::Parts};

use super::authenticator::TokenAuthenticator;
use super::errors::AuthFailure;
use super::state::HasAuthBackend;
use super::types::Identity;

/// Extractor for endpoints that require a valid access token.
/// Rejects with a 401 `{message}` body, or 500 for orphaned tokens.
pub struct ApiAuth(pub Identity);

impl<S> FromRequestParts<S> for ApiAuth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = AuthFailure;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        TokenAuthenticator::new(state.db())
            .authenticate(&parts.headers)
            .await
            .map(ApiAuth)
    }
}
