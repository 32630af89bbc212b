use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("connector configuration error")]
    Config(#[source] anyhow::Error),
    #[error("connector transport error")]
    Transport(#[source] reqwest::Error),
    #[error("connector remote error (status {status}, retry_after = {retry_after:?})")]
    Remote {
        status: StatusCode,
        retry_after: Option<Duration>,
        message: String,
    },
    #[error("connector response decode error")]
    Decode(#[source] anyhow::Error),
    #[error("failed to acquire app token: {0}")]
    Token(String),
}

impl ConnectorError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ConnectorError::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ConnectorError::Transport(_) => true,
            ConnectorError::Remote { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ConnectorError::Remote { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthenticationError {
    #[error("no auth header present; authentication is required")]
    MissingAuthHeader,
    #[error("invalid identity")]
    InvalidIdentity,
    #[error("token not authenticated")]
    NotAuthenticated,
    #[error("{0}")]
    InvalidClaims(String),
    #[error("invalid app id passed on token: '{0}'")]
    InvalidAppId(String),
    #[error("token validation failed")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),
    #[error("could not validate endorsement for key '{key_id}'")]
    Endorsement { key_id: String },
    #[error("token algorithm {0} is not allowed")]
    Algorithm(String),
    #[error("failed to load openid metadata: {0}")]
    Metadata(String),
}
