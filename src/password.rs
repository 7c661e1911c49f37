//! Password hashing with bcrypt.
//!
//! Hashing is CPU bound; async callers go through `spawn_blocking`.

use std::sync::LazyLock;

/// Cost used for newly created accounts.
pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

/// Shortest password accepted when creating an account.
pub const MIN_PASSWORD_LENGTH: usize = 8;

pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, cost)
}

/// Check a password against a stored hash. A malformed hash never verifies.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match bcrypt::verify(password, hash) {
        Ok(valid) => valid,
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash could not be parsed");
            false
        }
    }
}

/// Checked in place of a stored hash when the login does not exist.
static DUMMY_HASH: LazyLock<String> = LazyLock::new(|| {
    hash_password("resplan-placeholder-password", DEFAULT_COST).unwrap_or_default()
});

/// Verify a login attempt on the blocking pool. Without a stored hash the
/// password is still run through bcrypt, then rejected.
pub async fn verify_login_blocking(password: String, hash: Option<String>) -> bool {
    tokio::task::spawn_blocking(move || match hash {
        Some(hash) => verify_password(&password, &hash),
        None => {
            verify_password(&password, &DUMMY_HASH);
            false
        }
    })
    .await
    .unwrap_or(false)
}
