//! Error types for ratewatch

use thiserror::Error;

/// Main error type for ratewatch operations
#[derive(Error, Debug)]
pub enum RateWatchError {
    #[error("Invalid observation: {0}")]
    InvalidObservation(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

/// Result type alias for ratewatch operations
pub type Result<T> = std::result::Result<T, RateWatchError>;

impl From<rusqlite::Error> for RateWatchError {
    fn from(e: rusqlite::Error) -> Self {
        RateWatchError::StoreUnavailable(e.to_string())
    }
}

impl From<reqwest::Error> for RateWatchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RateWatchError::Timeout(e.to_string())
        } else {
            RateWatchError::Transport(e.to_string())
        }
    }
}
