//! Error types for the Bodega client core

use thiserror::Error;

/// Result type alias for Bodega operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the client core
///
/// An expired access token is not represented here: the 401 that signals it
/// is consumed inside the request pipeline's refresh-and-retry step and
/// never surfaces to callers.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote error [{code}]: {message}")]
    Remote { code: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// The normalized backend error code, when this is a remote rejection
    ///
    /// Lets callers match on stable codes such as `otp_incorrect` or
    /// `rate_limited` without pattern-matching the whole variant.
    pub fn remote_code(&self) -> Option<&str> {
        match self {
            Error::Remote { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
