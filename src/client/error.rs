use reqwest::StatusCode;
use thiserror::Error;

/// Errors surfaced by the API client.
///
/// `Clone` so a single refresh failure can be handed to every queued request.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("{message} (HTTP {status})")]
    Status { status: StatusCode, message: String },
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("session storage failed: {0}")]
    Storage(String),
    #[error("token refresh was abandoned before it completed")]
    RefreshCancelled,
    #[error("not authenticated")]
    NotAuthenticated,
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}
