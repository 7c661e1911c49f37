//! API client that attaches the session's bearer token and transparently
//! refreshes it on 401.

use std::future::{Future, poll_fn};
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::task::Poll;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info, warn};

use super::error::ClientError;
use super::refresh::{Recovery, RefreshCoordinator, Refreshed, ReplayTurn, plan_recovery};
use super::session::{ClientSession, Credentials, CurrentUser, SessionManager};
use super::transport::{ApiRequest, ApiResponse, DEFAULT_TIMEOUT_MS, ReqwestTransport, Transport};
use crate::token::TOKEN_TYPE;

pub const LOGIN_PATH: &str = "/login";
pub const REFRESH_TOKEN_PATH: &str = "/refresh-token";
pub const ME_PATH: &str = "/me";
pub const LOGOUT_PATH: &str = "/logout";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root, e.g. `http://localhost:8000/api`.
    pub base_url: String,
    /// Used when the server omits `token_type`.
    pub token_type_default: String,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token_type_default: TOKEN_TYPE.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

/// Receives busy/idle transitions, e.g. to drive a spinner.
pub trait BusyIndicator: Send + Sync {
    fn set_busy(&self, busy: bool);
}

struct NoIndicator;

impl BusyIndicator for NoIndicator {
    fn set_busy(&self, _busy: bool) {}
}

/// Counts requests in flight and reports 0→1 and →0 transitions.
pub struct RequestActivity {
    in_flight: AtomicI64,
    indicator: Arc<dyn BusyIndicator>,
}

impl RequestActivity {
    pub fn new(indicator: Arc<dyn BusyIndicator>) -> Self {
        Self {
            in_flight: AtomicI64::new(0),
            indicator,
        }
    }

    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn start(&self) -> ActivityGuard<'_> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) == 0 {
            self.indicator.set_busy(true);
        }
        ActivityGuard { activity: self }
    }
}

/// Decrements the in-flight counter when the request settles.
pub struct ActivityGuard<'a> {
    activity: &'a RequestActivity,
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        if self.activity.in_flight.fetch_sub(1, Ordering::SeqCst) <= 1 {
            self.activity.indicator.set_busy(false);
        }
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    token_type: Option<String>,
    user: CurrentUser,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
}

#[derive(Deserialize)]
struct MeResponse {
    user: CurrentUser,
}

pub struct AuthenticatedClient<T> {
    transport: T,
    session: Arc<SessionManager>,
    coordinator: Arc<RefreshCoordinator>,
    activity: Arc<RequestActivity>,
    token_type_default: String,
}

impl AuthenticatedClient<ReqwestTransport> {
    pub fn connect(config: &ClientConfig, session: Arc<SessionManager>) -> Result<Self, ClientError> {
        let transport = ReqwestTransport::new(config.base_url.clone(), config.timeout)?;
        let mut client = Self::new(transport, session);
        client.token_type_default = config.token_type_default.clone();
        Ok(client)
    }
}

impl<T: Transport> AuthenticatedClient<T> {
    pub fn new(transport: T, session: Arc<SessionManager>) -> Self {
        Self {
            transport,
            session,
            coordinator: Arc::new(RefreshCoordinator::new()),
            activity: Arc::new(RequestActivity::new(Arc::new(NoIndicator))),
            token_type_default: TOKEN_TYPE.to_string(),
        }
    }

    /// Share a coordinator between clients using the same session.
    pub fn with_coordinator(mut self, coordinator: Arc<RefreshCoordinator>) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn with_busy_indicator(mut self, indicator: Arc<dyn BusyIndicator>) -> Self {
        self.activity = Arc::new(RequestActivity::new(indicator));
        self
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn activity(&self) -> &Arc<RequestActivity> {
        &self.activity
    }

    fn prepare(&self, request: &ApiRequest) -> ApiRequest {
        let mut prepared = request.clone();
        if prepared.authorization.is_none() {
            prepared.authorization = self.session.credentials().map(|c| c.header_value());
        }
        prepared
    }

    /// Send once with the current credentials. No retry.
    pub async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let _guard = self.activity.start();
        let prepared = self.prepare(request);
        self.transport.execute(&prepared).await?.error_for_status()
    }

    /// Send a replay once every earlier participant of the same refresh has
    /// issued theirs. The next turn opens as soon as this request is on its
    /// way, not when its response arrives.
    async fn replay(
        &self,
        request: &ApiRequest,
        mut turn: ReplayTurn,
    ) -> Result<ApiResponse, ClientError> {
        let _guard = self.activity.start();
        turn.wait().await;

        let prepared = self.prepare(request);
        let mut response = pin!(self.transport.execute(&prepared));
        let first = poll_fn(|cx| Poll::Ready(response.as_mut().poll(cx))).await;
        turn.release();

        let response = match first {
            Poll::Ready(response) => response,
            Poll::Pending => response.await,
        };
        response?.error_for_status()
    }

    /// Send, refreshing the access token and replaying once on 401.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        match self.dispatch(&request).await {
            Ok(response) => Ok(response),
            Err(error) => self.recover(request, error).await,
        }
    }

    async fn recover(
        &self,
        mut request: ApiRequest,
        error: ClientError,
    ) -> Result<ApiResponse, ClientError> {
        let has_refresh_token = self.session.refresh_token().is_some();

        match plan_recovery(&error, &request, has_refresh_token, REFRESH_TOKEN_PATH) {
            Recovery::Propagate => Err(error),
            Recovery::ClearAndPropagate => {
                debug!(path = %request.path, "Unauthorized without refresh token");
                self.clear_session();
                Err(error)
            }
            Recovery::Refresh => {
                request.mark_retried();
                let Refreshed { credentials, turn } = self
                    .coordinator
                    .run(|| self.exchange_refresh_token())
                    .await?;
                request.authorization = Some(credentials.header_value());
                self.replay(&request, turn).await
            }
        }
    }

    /// Trade the refresh token for a new access token. Any failure ends the
    /// session.
    async fn exchange_refresh_token(&self) -> Result<Credentials, ClientError> {
        match self.try_exchange_refresh_token().await {
            Ok(credentials) => {
                info!("Access token refreshed");
                Ok(credentials)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, ending session");
                self.clear_session();
                Err(e)
            }
        }
    }

    async fn try_exchange_refresh_token(&self) -> Result<Credentials, ClientError> {
        let refresh_token = self
            .session
            .refresh_token()
            .ok_or(ClientError::NotAuthenticated)?;

        let request = ApiRequest::post(
            REFRESH_TOKEN_PATH,
            json!({ "refresh_token": refresh_token }),
        );
        let response: RefreshResponse = self.dispatch(&request).await?.json()?;

        let token_type = response
            .token_type
            .unwrap_or_else(|| self.token_type_default.clone());
        self.session
            .update_access_token(response.access_token, token_type)
    }

    fn clear_session(&self) {
        if let Err(e) = self.session.clear() {
            warn!(error = %e, "Failed to clear session");
        }
    }

    pub async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, ClientError> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    pub async fn post_json<R: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<R, ClientError> {
        self.send(ApiRequest::post(path, body)).await?.json()
    }

    /// Log in and start a session. `remember_me` selects durable storage.
    pub async fn login(
        &self,
        login: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<CurrentUser, ClientError> {
        let request = ApiRequest::post(
            LOGIN_PATH,
            json!({ "login": login, "password": password }),
        );
        let response: LoginResponse = self.dispatch(&request).await?.json()?;

        let token_type = response
            .token_type
            .unwrap_or_else(|| self.token_type_default.clone());
        self.session.begin(ClientSession {
            access_token: response.access_token,
            token_type,
            refresh_token: Some(response.refresh_token),
            remember_me,
            current_user: Some(response.user.clone()),
        })?;

        info!(login = %response.user.login, remember_me, "Logged in");
        Ok(response.user)
    }

    /// Revoke the access token server-side and drop the local session.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let result = if self.session.credentials().is_some() {
            self.send(ApiRequest::new(reqwest::Method::POST, LOGOUT_PATH))
                .await
                .map(|_| ())
        } else {
            Ok(())
        };

        self.session.clear()?;
        result
    }

    pub async fn me(&self) -> Result<CurrentUser, ClientError> {
        let response: MeResponse = self.get_json(ME_PATH).await?;
        self.session.set_current_user(response.user.clone())?;
        Ok(response.user)
    }

    /// Validate a stored session on startup. `None` when there is no usable
    /// session. An unreadable session file is discarded.
    pub async fn restore_session(&self) -> Result<Option<CurrentUser>, ClientError> {
        match self.session.restore() {
            Ok(Some(_)) => {}
            Ok(None) => return Ok(None),
            Err(ClientError::Storage(e)) => {
                warn!(error = %e, "Stored session is unreadable, discarding it");
                self.clear_session();
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        match self.me().await {
            Ok(user) => Ok(Some(user)),
            Err(e) if e.is_unauthorized() => {
                self.clear_session();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
