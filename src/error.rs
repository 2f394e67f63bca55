// Error handling module
// Failures surface to callers unchanged; the pipeline only inspects them
// to decide whether a 401 is worth a refresh attempt.

use thiserror::Error;

/// Errors produced by the request pipeline
#[derive(Error, Debug)]
pub enum ClientError {
    /// The backend answered with a non-success status
    #[error("upstream error: {status} - {body}")]
    Upstream { status: u16, body: String },

    /// The request never produced a response (connect failure, timeout,
    /// malformed request)
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Internal client error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ClientError {
    /// Status code of the upstream response, if there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True only for a 401 carried by a real response. Transport errors
    /// without a response are never treated as auth failures.
    pub fn is_auth_failure(&self) -> bool {
        self.status() == Some(401)
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
