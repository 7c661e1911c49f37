//! Password login.
//!
//! - POST `/login` - Exchange `{login, password}` for an access/refresh token pair

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    middleware,
    routing::post,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::error::{ApiError, ResultExt};
use crate::db::{Database, UserProfile};
use crate::password::verify_login_blocking;
use crate::rate_limit::{RateLimitConfig, rate_limit_login};
use crate::token::{TOKEN_TYPE, TokenConfig, unix_now};

#[derive(Clone)]
pub struct LoginState {
    pub db: Database,
    pub tokens: TokenConfig,
    pub rate_limit: Arc<RateLimitConfig>,
}

pub fn router(state: LoginState) -> Router {
    let rate_limit = state.rate_limit.clone();
    Router::new()
        .route("/login", post(login))
        .with_state(state)
        .layer(middleware::from_fn_with_state(rate_limit, rate_limit_login))
}

#[derive(Deserialize)]
struct LoginRequest {
    login: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    access_token: String,
    refresh_token: String,
    token_type: &'static str,
    user: UserProfile,
}

const INVALID_CREDENTIALS: &str = "Invalid credentials";

async fn login(
    State(state): State<LoginState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(payload) = payload?;
    let login = payload.login.trim();
    if login.is_empty() {
        return Err(ApiError::bad_request("Login cannot be empty"));
    }

    let user = state
        .db
        .users()
        .get_by_login(login)
        .await
        .db_err("Failed to get user")?;

    // Unknown logins go through bcrypt too
    let hash = user.as_ref().map(|u| u.password_hash.clone());
    let verified = verify_login_blocking(payload.password, hash).await;

    let user = match user {
        Some(user) if verified => user,
        Some(user) => {
            info!(login = %user.login, "Rejected login with wrong password");
            return Err(ApiError::unauthorized(INVALID_CREDENTIALS));
        }
        None => {
            info!(login, "Rejected login for unknown user");
            return Err(ApiError::unauthorized(INVALID_CREDENTIALS));
        }
    };

    let now = unix_now();
    let access = state.tokens.issue_access(now);
    let refresh = state.tokens.issue_refresh(now);

    state
        .db
        .access_tokens()
        .create(user.id, &access.token, access.expires_at)
        .await
        .db_err("Failed to store access token")?;
    state
        .db
        .refresh_tokens()
        .create(user.id, &refresh.token, refresh.expires_at)
        .await
        .db_err("Failed to store refresh token")?;

    info!(login = %user.login, "User logged in");

    Ok(Json(LoginResponse {
        access_token: access.token,
        refresh_token: refresh.token,
        token_type: TOKEN_TYPE,
        user: UserProfile::from(&user),
    }))
}
