//! Authenticated identity types.

use crate::db::User;

/// The result of a successful bearer token authentication.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Owner of the presented access token
    pub user: User,
    /// Row ID of the access token used for this request
    pub token_id: i64,
}

impl Identity {
    /// Identities are keyed by the user's login name.
    pub fn user_identifier(&self) -> &str {
        &self.user.login
    }
}
