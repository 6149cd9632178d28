//! Jito Error Types

use thiserror::Error;

use crate::ports::NetworkError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum JitoError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Block Engine error: {message} (code: {code})")]
    Api { code: i32, message: String },

    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Request timed out")]
    Timeout,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

impl JitoError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, JitoError::Http(_) | JitoError::Timeout | JitoError::RateLimited)
    }
}

impl From<reqwest::Error> for JitoError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            JitoError::Timeout
        } else {
            JitoError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for JitoError {
    fn from(err: serde_json::Error) -> Self {
        JitoError::Serialization(err.to_string())
    }
}

impl From<JitoError> for NetworkError {
    fn from(e: JitoError) -> Self {
        match e {
            JitoError::Http(msg) => NetworkError::Unreachable(msg),
            JitoError::Timeout => NetworkError::Timeout,
            JitoError::RateLimited => NetworkError::RateLimited,
            e @ JitoError::MaxRetriesExceeded { .. } => NetworkError::Unreachable(e.to_string()),
            e @ (JitoError::Api { .. }
            | JitoError::InvalidBundle(_)
            | JitoError::InvalidTransaction(_)
            | JitoError::Serialization(_)) => NetworkError::Rejected(e.to_string()),
        }
    }
}
