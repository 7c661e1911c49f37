#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode},
};
use resplan::{
    DEFAULT_LOGIN_ATTEMPTS_PER_MINUTE, ServerConfig, create_app, db::Database,
    password::hash_password, rate_limit::RateLimitConfig, token::TokenConfig,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use tower::ServiceExt;

pub const LOGIN: &str = "alice";
pub const PASSWORD: &str = "correct horse battery";

/// Low bcrypt cost keeps tests fast.
pub const TEST_BCRYPT_COST: u32 = 4;

/// Open an in-memory database with one user. Returns the user's ID.
pub async fn create_test_db() -> (Database, i64) {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let hash = hash_password(PASSWORD, TEST_BCRYPT_COST).expect("Failed to hash password");
    let user_id = db
        .users()
        .create(LOGIN, "Alice Martin", &hash)
        .await
        .expect("Failed to create user");
    (db, user_id)
}

pub fn test_config(db: Database) -> ServerConfig {
    ServerConfig {
        db,
        tokens: TokenConfig::default(),
        rate_limit: Arc::new(RateLimitConfig::new(
            DEFAULT_LOGIN_ATTEMPTS_PER_MINUTE,
            false,
        )),
    }
}

pub fn test_config_with_login_limit(db: Database, per_minute: u32) -> ServerConfig {
    ServerConfig {
        rate_limit: Arc::new(RateLimitConfig::new(
            NonZeroU32::new(per_minute).expect("limit must be non-zero"),
            false,
        )),
        ..test_config(db)
    }
}

pub async fn create_test_app() -> (Router, Database, i64) {
    let (db, user_id) = create_test_db().await;
    (create_app(&test_config(db.clone())), db, user_id)
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

/// POST a body verbatim, without checking it is valid JSON.
pub async fn post_raw(app: &Router, uri: &str, body: &'static str) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn get_with_auth(app: &Router, uri: &str, authorization: &str) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header("authorization", authorization)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Log in as the test user and return the parsed response.
pub async fn login(app: &Router) -> serde_json::Value {
    let response = post_json(
        app,
        "/api/login",
        serde_json::json!({ "login": LOGIN, "password": PASSWORD }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}
