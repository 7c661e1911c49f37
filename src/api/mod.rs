mod error;
mod login;
mod tokens;
mod users;

use axum::Router;
use std::sync::Arc;

use crate::db::Database;
use crate::rate_limit::RateLimitConfig;
use crate::token::TokenConfig;

/// Create the API router.
pub fn create_api_router(
    db: Database,
    tokens: TokenConfig,
    rate_limit: Arc<RateLimitConfig>,
) -> Router {
    let login_state = login::LoginState {
        db: db.clone(),
        tokens,
        rate_limit,
    };

    let tokens_state = tokens::TokensState {
        db: db.clone(),
        tokens,
    };

    let users_state = users::UsersState { db };

    Router::new()
        .merge(login::router(login_state))
        .merge(tokens::router(tokens_state))
        .merge(users::router(users_state))
}
