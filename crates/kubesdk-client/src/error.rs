use std::time::Duration;

use http::StatusCode;

use kubesdk_diff::DiffError;
use kubesdk_types::K8Status;

/// failure raised below the protocol layer, before a status line was read
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error("stream interrupted: {0}")]
    Stream(String),
}

/// coarse classification of a terminal HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Gone,
    Invalid,
    ServerError,
    Other,
}

impl StatusKind {
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            410 => Self::Gone,
            422 => Self::Invalid,
            500..=599 => Self::ServerError,
            _ => Self::Other,
        }
    }
}

/// terminal non-success response, with the decoded status body when the
/// server sent one
#[derive(Debug, thiserror::Error)]
#[error("server returned {status}: {}", .body.as_ref().and_then(|b| b.message.as_deref()).unwrap_or("no detail"))]
pub struct StatusError {
    pub status: StatusCode,
    pub kind: StatusKind,
    pub body: Option<K8Status>,
}

impl StatusError {
    pub fn new(status: StatusCode, body: Option<K8Status>) -> Self {
        Self {
            status,
            kind: StatusKind::from_status(status),
            body,
        }
    }

    /// the watch checkpoint this request carried is no longer servable
    pub fn is_gone(&self) -> bool {
        self.kind == StatusKind::Gone
            || self.body.as_ref().map(K8Status::is_gone).unwrap_or(false)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),
    #[error("request cancelled")]
    Cancelled,
    #[error(transparent)]
    Diff(#[from] DiffError),
    #[error("no session logged in for `{0}`")]
    NoSession(String),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl ClientError {
    /// status code of the terminal response, when the failure has one
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status(err) => Some(err.status),
            _ => None,
        }
    }
}
