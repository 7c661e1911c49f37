//! Bearer token authentication.
//!
//! Access tokens are opaque strings stored server-side with an absolute
//! expiry. Each protected request looks its token up, checks expiry and
//! resolves the owning user. Refresh tokens live in their own table and are
//! only accepted by the refresh endpoint.

mod authenticator;
mod bearer;
mod errors;
mod extractors;
mod ip;
mod state;
mod types;

pub use authenticator::TokenAuthenticator;
pub use bearer::{BEARER_PREFIX, extract_token, supports};
pub use errors::{AuthErrorKind, AuthFailure, MessageBody, on_authentication_failure};
pub use extractors::ApiAuth;
pub use ip::extract_client_ip;
pub use state::HasAuthBackend;
pub use types::Identity;
