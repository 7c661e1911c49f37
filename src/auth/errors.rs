//! Authentication error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Why a request could not be authenticated. All kinds map to 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    MissingToken,
    InvalidToken,
    TokenExpired,
}

impl AuthErrorKind {
    pub fn message(&self) -> &'static str {
        match self {
            AuthErrorKind::MissingToken => "Missing token",
            AuthErrorKind::InvalidToken => "Invalid token",
            AuthErrorKind::TokenExpired => "Token expired",
        }
    }
}

impl std::fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for AuthErrorKind {}

/// JSON body for every error response.
#[derive(Debug, Serialize)]
pub struct MessageBody {
    pub message: String,
}

/// Render an authentication failure as an HTTP response.
pub fn on_authentication_failure(kind: AuthErrorKind) -> (StatusCode, Json<MessageBody>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(MessageBody {
            message: kind.to_string(),
        }),
    )
}

/// Outcome of a failed `authenticate` call.
///
/// Only `Unauthenticated` is a client error. The other variants are server
/// faults and render as 500.
#[derive(Debug)]
pub enum AuthFailure {
    Unauthenticated(AuthErrorKind),
    /// The token row exists but its owner does not.
    OrphanToken { token_id: i64 },
    DatabaseError,
}

impl From<AuthErrorKind> for AuthFailure {
    fn from(kind: AuthErrorKind) -> Self {
        Self::Unauthenticated(kind)
    }
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthFailure::Unauthenticated(kind) => write!(f, "{}", kind),
            AuthFailure::OrphanToken { token_id } => {
                write!(f, "Access token {} has no associated user", token_id)
            }
            AuthFailure::DatabaseError => write!(f, "Database error"),
        }
    }
}

impl std::error::Error for AuthFailure {}

impl IntoResponse for AuthFailure {
    fn into_response(self) -> Response {
        match self {
            AuthFailure::Unauthenticated(kind) => on_authentication_failure(kind).into_response(),
            AuthFailure::OrphanToken { .. } | AuthFailure::DatabaseError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(MessageBody {
                    message: "Internal server error".to_string(),
                }),
            )
                .into_response(),
        }
    }
}
