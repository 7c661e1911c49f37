//! Client for the API with persistent sessions and automatic token refresh.

pub mod error;
pub mod http;
pub mod refresh;
pub mod session;
pub mod storage;
pub mod transport;

pub use error::ClientError;
pub use http::{
    AuthenticatedClient, BusyIndicator, ClientConfig, LOGIN_PATH, LOGOUT_PATH, ME_PATH,
    REFRESH_TOKEN_PATH, RequestActivity,
};
pub use refresh::{Recovery, RefreshCoordinator, plan_recovery};
pub use session::{ClientSession, Credentials, CurrentUser, SessionManager};
pub use storage::{DurableStorage, EphemeralStorage, SessionStorage, StorageScope};
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};
