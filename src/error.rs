//! Error taxonomy for the portal core.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PortalError>;

pub const DEFAULT_LOGIN_FAILURE: &str = "Invalid credentials";

#[derive(Debug, Error)]
pub enum PortalError {
    /// Login or code verification rejected. The user may retry.
    #[error("{0}")]
    InvalidCredentials(String),

    /// A bearer-authenticated call was refused. The session must be dropped.
    #[error("Session expired or invalid, please log in again")]
    SessionExpiredOrInvalid,

    /// Local input rejected before any request was sent.
    #[error("{0}")]
    Validation(String),

    /// Network failure or 5xx.
    #[error("Remote service unavailable: {0}")]
    RemoteUnavailable(String),

    /// Remote refused a write for a reason other than authorization.
    #[error("{0}")]
    Rejected(String),

    /// Operation not legal in the current auth state.
    #[error("{0}")]
    InvalidState(&'static str),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Session storage error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PortalError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, PortalError::SessionExpiredOrInvalid)
    }
}

impl From<sled::Error> for PortalError {
    fn from(err: sled::Error) -> Self {
        PortalError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for PortalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            PortalError::MalformedResponse(err.to_string())
        } else {
            PortalError::RemoteUnavailable(err.to_string())
        }
    }
}
