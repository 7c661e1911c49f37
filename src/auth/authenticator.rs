//! Bearer token authentication against the access token table.

use axum::http::HeaderMap;
use tracing::error;

use super::bearer;
use super::errors::{AuthErrorKind, AuthFailure};
use super::types::Identity;
use crate::db::Database;
use crate::token::unix_now;

/// Resolves `Authorization: Bearer <token>` headers to an [`Identity`].
pub struct TokenAuthenticator<'a> {
    db: &'a Database,
}

impl<'a> TokenAuthenticator<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// True iff the request has an `Authorization` header.
    pub fn supports(&self, headers: &HeaderMap) -> bool {
        bearer::supports(headers)
    }

    /// Authenticate against the current time.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, AuthFailure> {
        self.authenticate_at(headers, unix_now()).await
    }

    /// Authenticate as of `now` (Unix seconds).
    pub async fn authenticate_at(
        &self,
        headers: &HeaderMap,
        now: i64,
    ) -> Result<Identity, AuthFailure> {
        let raw_token = bearer::extract_token(headers)?;

        let token = self
            .db
            .access_tokens()
            .find(raw_token)
            .await
            .map_err(|e| {
                error!("Failed to look up access token: {}", e);
                AuthFailure::DatabaseError
            })?
            .ok_or(AuthErrorKind::InvalidToken)?;

        if token.is_expired_at(now) {
            return Err(AuthErrorKind::TokenExpired.into());
        }

        let orphan = || {
            error!(token_id = token.id, "Access token has no associated user");
            AuthFailure::OrphanToken { token_id: token.id }
        };

        let user_id = token.user_id.ok_or_else(orphan)?;
        let user = self
            .db
            .users()
            .get_by_id(user_id)
            .await
            .map_err(|e| {
                error!("Failed to get user: {}", e);
                AuthFailure::DatabaseError
            })?
            .ok_or_else(orphan)?;

        Ok(Identity {
            user,
            token_id: token.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, header};

    const NOW: i64 = 1_700_000_000;
    const HOUR: i64 = 3600;

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    async fn db_with_token(expires_at: i64) -> Database {
        let db = Database::open(":memory:").await.unwrap();
        let user_id = db.users().create("alice", "Alice", "hash").await.unwrap();
        db.access_tokens()
            .create(user_id, "abc", expires_at)
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_valid_token_resolves_user_login() {
        let db = db_with_token(NOW + HOUR).await;

        let identity = TokenAuthenticator::new(&db)
            .authenticate_at(&bearer("abc"), NOW)
            .await
            .unwrap();

        assert_eq!(identity.user_identifier(), "alice");
        assert_eq!(identity.user.display_name, "Alice");
    }

    #[tokio::test]
    async fn test_expired_token() {
        let db = db_with_token(NOW - HOUR).await;

        let result = TokenAuthenticator::new(&db)
            .authenticate_at(&bearer("abc"), NOW)
            .await;

        assert!(matches!(
            result,
            Err(AuthFailure::Unauthenticated(AuthErrorKind::TokenExpired))
        ));
    }

    #[tokio::test]
    async fn test_token_expiring_now_is_expired() {
        let db = db_with_token(NOW).await;

        let result = TokenAuthenticator::new(&db)
            .authenticate_at(&bearer("abc"), NOW)
            .await;

        assert!(matches!(
            result,
            Err(AuthFailure::Unauthenticated(AuthErrorKind::TokenExpired))
        ));
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let db = db_with_token(NOW + HOUR).await;

        let result = TokenAuthenticator::new(&db)
            .authenticate_at(&bearer("nope"), NOW)
            .await;

        assert!(matches!(
            result,
            Err(AuthFailure::Unauthenticated(AuthErrorKind::InvalidToken))
        ));
    }

    #[tokio::test]
    async fn test_missing_header() {
        let db = db_with_token(NOW + HOUR).await;
        let authenticator = TokenAuthenticator::new(&db);
        let headers = HeaderMap::new();

        assert!(!authenticator.supports(&headers));
        let result = authenticator.authenticate_at(&headers, NOW).await;
        assert!(matches!(
            result,
            Err(AuthFailure::Unauthenticated(AuthErrorKind::MissingToken))
        ));
    }

    #[tokio::test]
    async fn test_refresh_token_is_not_an_access_token() {
        let db = Database::open(":memory:").await.unwrap();
        let user_id = db.users().create("alice", "", "hash").await.unwrap();
        db.refresh_tokens()
            .create(user_id, "abc", NOW + HOUR)
            .await
            .unwrap();

        let result = TokenAuthenticator::new(&db)
            .authenticate_at(&bearer("abc"), NOW)
            .await;

        assert!(matches!(
            result,
            Err(AuthFailure::Unauthenticated(AuthErrorKind::InvalidToken))
        ));
    }

    #[tokio::test]
    async fn test_orphan_token_is_fatal() {
        let db = Database::open(":memory:").await.unwrap();
        sqlx::query("INSERT INTO access_tokens (user_id, token, expires_at) VALUES (NULL, ?, ?)")
            .bind("abc")
            .bind(NOW + HOUR)
            .execute(db.pool())
            .await
            .unwrap();

        let result = TokenAuthenticator::new(&db)
            .authenticate_at(&bearer("abc"), NOW)
            .await;

        assert!(matches!(result, Err(AuthFailure::OrphanToken { .. })));
    }
}
