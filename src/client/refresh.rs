//! Single-flight token refresh.
//!
//! The first request that needs a new access token becomes the leader and
//! performs the exchange. Requests arriving while it runs wait in a FIFO
//! queue and are settled with the leader's outcome once it completes.
//!
//! On success every participant also gets a [`ReplayTurn`]. Turns are
//! chained in arrival order (leader first), so replays are issued in the
//! order the requests joined, whichever task the scheduler wakes first.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::debug;

use super::error::ClientError;
use super::session::Credentials;
use super::transport::ApiRequest;

type Outcome = Result<Credentials, ClientError>;

#[derive(Default)]
struct State {
    refreshing: bool,
    waiters: VecDeque<oneshot::Sender<Result<Refreshed, ClientError>>>,
}

/// Credentials from a completed refresh plus this request's replay slot.
#[derive(Debug)]
pub struct Refreshed {
    pub credentials: Credentials,
    pub turn: ReplayTurn,
}

/// Position in the replay order.
///
/// [`wait`](Self::wait) resolves once the previous participant has issued
/// its replay; [`release`](Self::release) lets the next one go. Dropping an
/// unreleased turn releases it.
#[derive(Debug, Default)]
pub struct ReplayTurn {
    previous: Option<oneshot::Receiver<()>>,
    next: Option<oneshot::Sender<()>>,
}

impl ReplayTurn {
    /// Wait for the previous replay to be issued. Cancel safe.
    pub async fn wait(&mut self) {
        if let Some(previous) = self.previous.as_mut() {
            // A dropped predecessor counts as released.
            let _ = previous.await;
            self.previous = None;
        }
    }

    pub fn release(&mut self) {
        if let Some(next) = self.next.take() {
            let _ = next.send(());
        }
    }
}

impl Drop for ReplayTurn {
    fn drop(&mut self) {
        self.release();
    }
}

/// Deduplicates concurrent refresh attempts.
#[derive(Default)]
pub struct RefreshCoordinator {
    state: Mutex<State>,
    exchanges: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock().refreshing
    }

    /// Number of requests waiting on the in-flight refresh.
    pub fn queued(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Number of exchanges started by this coordinator.
    pub fn exchanges(&self) -> u64 {
        self.exchanges.load(Ordering::Relaxed)
    }

    /// Obtain fresh credentials, running `exchange` only if no refresh is
    /// already in flight. Otherwise wait for the in-flight one.
    pub async fn run<F, Fut>(&self, exchange: F) -> Result<Refreshed, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome>,
    {
        let waiter = {
            let mut state = self.lock();
            if state.refreshing {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(rx)
            } else {
                state.refreshing = true;
                None
            }
        };

        if let Some(rx) = waiter {
            return rx.await.unwrap_or(Err(ClientError::RefreshCancelled));
        }

        let lease = Lease {
            coordinator: self,
            settled: false,
        };
        self.exchanges.fetch_add(1, Ordering::Relaxed);
        let outcome = exchange().await;
        let turn = lease.settle(&outcome);
        outcome.map(|credentials| Refreshed { credentials, turn })
    }
}

/// Held by the leader. Dropping it unsettled (the leader was cancelled)
/// releases the queue with `RefreshCancelled`.
struct Lease<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl Lease<'_> {
    fn settle(mut self, outcome: &Outcome) -> ReplayTurn {
        self.settled = true;
        release(self.coordinator, outcome)
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if !self.settled {
            release(self.coordinator, &Err(ClientError::RefreshCancelled));
        }
    }
}

/// Return to idle and settle the queue in FIFO order. Returns the leader's
/// turn, which heads the replay chain.
fn release(coordinator: &RefreshCoordinator, outcome: &Outcome) -> ReplayTurn {
    let waiters = {
        let mut state = coordinator.lock();
        state.refreshing = false;
        std::mem::take(&mut state.waiters)
    };

    debug!(
        waiters = waiters.len(),
        success = outcome.is_ok(),
        "Token refresh settled"
    );

    let mut leader = ReplayTurn::default();
    let mut previous = None;
    if outcome.is_ok() {
        let (tx, rx) = oneshot::channel();
        leader.next = Some(tx);
        previous = Some(rx);
    }

    for waiter in waiters {
        let settled = match outcome {
            Ok(credentials) => {
                let (tx, rx) = oneshot::channel();
                Ok(Refreshed {
                    credentials: credentials.clone(),
                    turn: ReplayTurn {
                        previous: previous.replace(rx),
                        next: Some(tx),
                    },
                })
            }
            Err(e) => Err(e.clone()),
        };
        // A waiter whose request was dropped has nobody to notify. Its
        // turn is dropped here, which passes the chain along.
        let _ = waiter.send(settled);
    }

    leader
}

/// What to do with a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    Propagate,
    ClearAndPropagate,
    Refresh,
}

pub fn plan_recovery(
    error: &ClientError,
    request: &ApiRequest,
    has_refresh_token: bool,
    refresh_path: &str,
) -> Recovery {
    if !error.is_unauthorized() || request.path == refresh_path || request.is_retried() {
        Recovery::Propagate
    } else if !has_refresh_token {
        Recovery::ClearAndPropagate
    } else {
        Recovery::Refresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::sync::Arc;

    fn credentials(token: &str) -> Credentials {
        Credentials {
            token_type: "Bearer".into(),
            access_token: token.into(),
        }
    }

    fn unauthorized() -> ClientError {
        ClientError::Status {
            status: StatusCode::UNAUTHORIZED,
            message: "Token expired".into(),
        }
    }

    #[test]
    fn test_plan_recovery() {
        let request = ApiRequest::get("/me");

        assert_eq!(
            plan_recovery(&unauthorized(), &request, true, "/refresh-token"),
            Recovery::Refresh
        );
        assert_eq!(
            plan_recovery(&unauthorized(), &request, false, "/refresh-token"),
            Recovery::ClearAndPropagate
        );

        let server_error = ClientError::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Internal server error".into(),
        };
        assert_eq!(
            plan_recovery(&server_error, &request, true, "/refresh-token"),
            Recovery::Propagate
        );
        assert_eq!(
            plan_recovery(
                &ClientError::Transport("timeout".into()),
                &request,
                true,
                "/refresh-token"
            ),
            Recovery::Propagate
        );
    }

    #[test]
    fn test_refresh_request_is_never_recovered() {
        let request = ApiRequest::post("/refresh-token", serde_json::json!({}));
        assert_eq!(
            plan_recovery(&unauthorized(), &request, true, "/refresh-token"),
            Recovery::Propagate
        );
    }

    #[test]
    fn test_retried_request_is_never_recovered() {
        let mut request = ApiRequest::get("/me");
        request.mark_retried();
        assert_eq!(
            plan_recovery(&unauthorized(), &request, true, "/refresh-token"),
            Recovery::Propagate
        );
        // Even without a refresh token the session is left alone
        assert_eq!(
            plan_recovery(&unauthorized(), &request, false, "/refresh-token"),
            Recovery::Propagate
        );
    }

    #[tokio::test]
    async fn test_single_run() {
        let coordinator = RefreshCoordinator::new();

        let result = coordinator.run(|| async { Ok(credentials("new")) }).await;

        assert_eq!(result.unwrap().credentials, credentials("new"));
        assert_eq!(coordinator.exchanges(), 1);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_concurrent_runs_share_one_exchange() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let leader = coordinator.run(|| async move {
            gate_rx.await.ok();
            Ok(credentials("new"))
        });
        let first = coordinator.run(|| async { Ok(credentials("unused")) });
        let second = coordinator.run(|| async { Ok(credentials("unused")) });
        let driver = async {
            while coordinator.queued() < 2 {
                tokio::task::yield_now().await;
            }
            gate_tx.send(()).ok();
        };

        let (leader, first, second, ()) = tokio::join!(leader, first, second, driver);

        assert_eq!(leader.unwrap().credentials, credentials("new"));
        assert_eq!(first.unwrap().credentials, credentials("new"));
        assert_eq!(second.unwrap().credentials, credentials("new"));
        assert_eq!(coordinator.exchanges(), 1);
        assert_eq!(coordinator.queued(), 0);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_failure_rejects_every_waiter() {
        let coordinator = RefreshCoordinator::new();
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let leader = coordinator.run(|| async move {
            gate_rx.await.ok();
            Err(unauthorized())
        });
        let waiter = coordinator.run(|| async { Ok(credentials("unused")) });
        let driver = async {
            while coordinator.queued() < 1 {
                tokio::task::yield_now().await;
            }
            gate_tx.send(()).ok();
        };

        let (leader, waiter, ()) = tokio::join!(leader, waiter, driver);

        assert!(leader.unwrap_err().is_unauthorized());
        assert!(waiter.unwrap_err().is_unauthorized());
        assert_eq!(coordinator.exchanges(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_leader_releases_waiters() {
        let coordinator = RefreshCoordinator::new();

        let mut leader = Box::pin(coordinator.run(std::future::pending));
        assert!(futures::poll!(&mut leader).is_pending());
        assert!(coordinator.is_refreshing());

        let mut waiter = Box::pin(coordinator.run(|| async { Ok(credentials("unused")) }));
        assert!(futures::poll!(&mut waiter).is_pending());
        assert_eq!(coordinator.queued(), 1);

        drop(leader);

        assert!(matches!(waiter.await, Err(ClientError::RefreshCancelled)));
        assert!(!coordinator.is_refreshing());

        // The next caller leads a fresh exchange
        let result = coordinator.run(|| async { Ok(credentials("again")) }).await;
        assert_eq!(result.unwrap().credentials, credentials("again"));
        assert_eq!(coordinator.exchanges(), 2);
    }

    #[tokio::test]
    async fn test_replay_turns_follow_arrival_order() {
        let coordinator = RefreshCoordinator::new();
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let leader = coordinator.run(|| async move {
            gate_rx.await.ok();
            Ok(credentials("new"))
        });
        let first = coordinator.run(|| async { Ok(credentials("unused")) });
        let second = coordinator.run(|| async { Ok(credentials("unused")) });
        let driver = async {
            while coordinator.queued() < 2 {
                tokio::task::yield_now().await;
            }
            gate_tx.send(()).ok();
        };

        let (leader, first, second, ()) = tokio::join!(leader, first, second, driver);
        let mut leader = leader.unwrap().turn;
        let mut first = first.unwrap().turn;
        let mut second = second.unwrap().turn;

        // The leader goes first without waiting
        assert!(futures::poll!(Box::pin(leader.wait())).is_ready());

        {
            let mut second_wait = Box::pin(second.wait());
            assert!(futures::poll!(&mut second_wait).is_pending());
            let mut first_wait = Box::pin(first.wait());
            assert!(futures::poll!(&mut first_wait).is_pending());

            leader.release();
            assert!(futures::poll!(&mut first_wait).is_ready());
            assert!(futures::poll!(&mut second_wait).is_pending());
        }

        // Dropping a turn passes the chain along
        drop(first);
        assert!(futures::poll!(Box::pin(second.wait())).is_ready());
    }

    #[tokio::test]
    async fn test_failed_refresh_hands_out_no_turns() {
        let coordinator = RefreshCoordinator::new();

        let mut leader = Box::pin(coordinator.run(|| async {
            tokio::task::yield_now().await;
            Err(unauthorized())
        }));
        assert!(futures::poll!(&mut leader).is_pending());
        let mut waiter = Box::pin(coordinator.run(|| async { Ok(credentials("unused")) }));
        assert!(futures::poll!(&mut waiter).is_pending());

        let (leader, waiter) = tokio::join!(leader, waiter);

        assert!(leader.is_err());
        assert!(waiter.is_err());
        assert_eq!(coordinator.exchanges(), 1);
        assert!(!coordinator.is_refreshing());
    }
}
