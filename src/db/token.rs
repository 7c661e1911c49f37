//! Issued token storage.
//!
//! Access and refresh tokens share one row shape but live in separate tables.
//! Tokens are opaque strings looked up by exact match; expiry is a Unix
//! timestamp in seconds.

use sqlx::sqlite::SqlitePool;

/// Which token table a [`TokenStore`] operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Statements for one token table.
struct TokenQueries {
    insert: &'static str,
    find: &'static str,
    delete_by_id: &'static str,
    delete_expired: &'static str,
}

const ACCESS_QUERIES: TokenQueries = TokenQueries {
    insert: "INSERT INTO access_tokens (user_id, token, expires_at) VALUES (?, ?, ?)",
    find: "SELECT id, user_id, token, expires_at FROM access_tokens WHERE token = ?",
    delete_by_id: "DELETE FROM access_tokens WHERE id = ?",
    delete_expired: "DELETE FROM access_tokens WHERE expires_at <= ?",
};

const REFRESH_QUERIES: TokenQueries = TokenQueries {
    insert: "INSERT INTO refresh_tokens (user_id, token, expires_at) VALUES (?, ?, ?)",
    find: "SELECT id, user_id, token, expires_at FROM refresh_tokens WHERE token = ?",
    delete_by_id: "DELETE FROM refresh_tokens WHERE id = ?",
    delete_expired: "DELETE FROM refresh_tokens WHERE expires_at <= ?",
};

impl TokenKind {
    fn queries(&self) -> &'static TokenQueries {
        match self {
            TokenKind::Access => &ACCESS_QUERIES,
            TokenKind::Refresh => &REFRESH_QUERIES,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// A stored token row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredToken {
    pub id: i64,
    /// Owning user. `None` when the owner was deleted after issuance.
    pub user_id: Option<i64>,
    pub token: String,
    pub expires_at: i64,
}

impl StoredToken {
    /// A token is expired once `now` reaches its expiry.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// Store for one kind of issued token.
pub struct TokenStore {
    pool: SqlitePool,
    kind: TokenKind,
}

impl TokenStore {
    pub fn new(pool: SqlitePool, kind: TokenKind) -> Self {
        Self { pool, kind }
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Record a newly issued token. Returns the row ID.
    pub async fn create(
        &self,
        user_id: i64,
        token: &str,
        expires_at: i64,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(self.kind.queries().insert)
            .bind(user_id)
            .bind(token)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Find a token by its exact string value.
    pub async fn find(&self, token: &str) -> Result<Option<StoredToken>, sqlx::Error> {
        sqlx::query_as(self.kind.queries().find)
            .bind(token)
            .fetch_optional(&self.pool)
            .await
    }

    /// Delete a token by row ID.
    pub async fn delete_by_id(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(self.kind.queries().delete_by_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every token that expired at or before `now`.
    pub async fn delete_expired(&self, now: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(self.kind.queries().delete_expired)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
