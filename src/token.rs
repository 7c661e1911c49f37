//! Opaque token generation and lifetimes.
//!
//! Tokens carry no claims: they are 32 random bytes, base64url encoded, and
//! only mean something once recorded in the access or refresh token table.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

/// Token type returned to clients and expected in the `Authorization` header.
pub const TOKEN_TYPE: &str = "Bearer";

/// Access token lifetime: 1 hour
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: u64 = 60 * 60;

/// Refresh token lifetime: 30 days
pub const DEFAULT_REFRESH_TOKEN_TTL_SECS: u64 = 30 * 24 * 60 * 60;

const TOKEN_BYTES: usize = 32;

/// Lifetimes applied when issuing tokens.
#[derive(Debug, Clone, Copy)]
pub struct TokenConfig {
    access_ttl: u64,
    refresh_ttl: u64,
}

/// A freshly generated token and its absolute expiry.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The opaque token string
    pub token: String,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ACCESS_TOKEN_TTL_SECS, DEFAULT_REFRESH_TOKEN_TTL_SECS)
    }
}

impl TokenConfig {
    pub fn new(access_ttl: u64, refresh_ttl: u64) -> Self {
        Self {
            access_ttl,
            refresh_ttl,
        }
    }

    /// Generate an access token expiring `access_ttl` seconds after `now`.
    pub fn issue_access(&self, now: i64) -> IssuedToken {
        issue(now, self.access_ttl)
    }

    /// Generate a refresh token expiring `refresh_ttl` seconds after `now`.
    pub fn issue_refresh(&self, now: i64) -> IssuedToken {
        issue(now, self.refresh_ttl)
    }
}

fn issue(now: i64, ttl: u64) -> IssuedToken {
    let ttl = i64::try_from(ttl).unwrap_or(i64::MAX);
    IssuedToken {
        token: generate_token(),
        expires_at: now.saturating_add(ttl),
    }
}

/// Generate a random opaque token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Current time as Unix seconds.
pub fn unix_now() -> i64 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    i64::try_from(secs).unwrap_or(i64::MAX)
}
