use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::auth::ApiAuth;
use crate::db::{Database, UserProfile};
use crate::impl_has_auth_backend;

#[derive(Clone)]
pub struct UsersState {
    pub db: Database,
}

impl_has_auth_backend!(UsersState);

pub fn router(state: UsersState) -> Router {
    Router::new().route("/me", get(me)).with_state(state)
}

#[derive(Serialize)]
struct MeResponse {
    user: UserProfile,
}

/// Return the user owning the presented access token.
async fn me(ApiAuth(identity): ApiAuth) -> Json<MeResponse> {
    Json(MeResponse {
        user: UserProfile::from(&identity.user),
    })
}
