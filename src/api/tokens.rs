//! Token management API endpoints.
//!
//! - POST `/refresh-token` - Exchange a refresh token for a new access token
//! - POST `/logout` - Revoke the access token used for the request

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::error::{ApiError, ResultExt};
use crate::auth::ApiAuth;
use crate::db::Database;
use crate::impl_has_auth_backend;
use crate::token::{TOKEN_TYPE, TokenConfig, unix_now};

#[derive(Clone)]
pub struct TokensState {
    pub db: Database,
    pub tokens: TokenConfig,
}

impl_has_auth_backend!(TokensState);

pub fn router(state: TokensState) -> Router {
    Router::new()
        .route("/refresh-token", post(refresh_token))
        .route("/logout", post(logout))
        .with_state(state)
}

#[derive(Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Serialize)]
struct RefreshResponse {
    access_token: String,
    token_type: &'static str,
}

/// Issue a new access token for a valid refresh token.
/// The refresh token itself is not rotated.
async fn refresh_token(
    State(state): State<TokensState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let Json(payload) = payload?;
    let now = unix_now();

    let stored = state
        .db
        .refresh_tokens()
        .find(&payload.refresh_token)
        .await
        .db_err("Failed to check refresh token")?
        .ok_or_else(|| ApiError::unauthorized("Invalid refresh token"))?;

    if stored.is_expired_at(now) {
        return Err(ApiError::unauthorized("Refresh token expired"));
    }

    let orphan = || {
        error!(token_id = stored.id, "Refresh token has no associated user");
        ApiError::internal("Internal server error")
    };
    let user_id = stored.user_id.ok_or_else(orphan)?;
    let user = state
        .db
        .users()
        .get_by_id(user_id)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(orphan)?;

    let access = state.tokens.issue_access(now);
    state
        .db
        .access_tokens()
        .create(user.id, &access.token, access.expires_at)
        .await
        .db_err("Failed to store access token")?;

    info!(login = %user.login, "Access token refreshed");

    Ok(Json(RefreshResponse {
        access_token: access.token,
        token_type: TOKEN_TYPE,
    }))
}

/// Revoke the access token presented with this request.
async fn logout(
    State(state): State<TokensState>,
    ApiAuth(identity): ApiAuth,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .access_tokens()
        .delete_by_id(identity.token_id)
        .await
        .db_err("Failed to revoke access token")?;

    info!(login = %identity.user_identifier(), "User logged out");

    Ok(StatusCode::NO_CONTENT)
}
