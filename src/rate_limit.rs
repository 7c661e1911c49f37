//! Rate limiting for the login endpoint.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down password
//! guessing.

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};
use tracing::{debug, warn};

use crate::auth::{MessageBody, extract_client_ip};

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Bucket shared by requests whose client IP cannot be determined.
const UNKNOWN_CLIENT: &str = "unknown";

/// Rate limiting configuration for the login endpoint.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Per-IP limiter for login attempts
    pub login: Arc<IpLimiter>,
    /// Key clients by `X-Forwarded-For` instead of the socket address
    pub trust_forwarded_for: bool,
}

impl RateLimitConfig {
    /// Allow `attempts_per_minute` login attempts per IP, with the full
    /// allowance available as an initial burst.
    pub fn new(attempts_per_minute: NonZeroU32, trust_forwarded_for: bool) -> Self {
        Self::with_quota(Quota::per_minute(attempts_per_minute), trust_forwarded_for)
    }

    pub fn with_quota(quota: Quota, trust_forwarded_for: bool) -> Self {
        Self {
            login: Arc::new(RateLimiter::keyed(quota)),
            trust_forwarded_for,
        }
    }

    /// Forget clients whose bucket has fully refilled. Entries are otherwise
    /// kept for every IP ever seen.
    pub fn retain_recent(&self) {
        let before = self.login.len();
        self.login.retain_recent();
        self.login.shrink_to_fit();
        debug!(
            before,
            after = self.login.len(),
            "Pruned login rate limit state"
        );
    }
}

/// Middleware for rate limiting login attempts.
pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = extract_client_ip(&request, config.trust_forwarded_for).unwrap_or_else(|| {
        debug!("No client IP available, using shared rate limit bucket");
        UNKNOWN_CLIENT.to_string()
    });

    match config.login.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            warn!(ip = %ip, "Login rate limit exceeded");
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(MessageBody {
                    message: "Too many login attempts. Please wait before trying again."
                        .to_string(),
                }),
            )
                .into_response()
        }
    }
}
