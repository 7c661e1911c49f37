//! Scheduled cleanup of expired tokens.

use crate::db::{Database, TokenStore};
use crate::rate_limit::RateLimitConfig;
use crate::token::unix_now;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// Run all cleanup tasks once.
pub async fn run_cleanup(db: &Database) {
    let now = unix_now();
    purge_expired(db.access_tokens(), now).await;
    purge_expired(db.refresh_tokens(), now).await;
}

async fn purge_expired(store: TokenStore, now: i64) {
    let kind = store.kind().as_str();
    match store.delete_expired(now).await {
        Ok(count) if count > 0 => info!("Cleaned up {} expired {} tokens", count, kind),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up expired {} tokens: {}", kind, e),
    }
}

/// Spawn a background task that runs cleanup periodically, pruning idle
/// rate limit entries on the same schedule.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(
    db: Database,
    rate_limit: Arc<RateLimitConfig>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        // The first tick completes immediately; startup already ran a pass.
        interval.tick().await;

        loop {
            interval.tick().await;
            run_cleanup(&db).await;
            rate_limit.retain_recent();
        }
    })
}
