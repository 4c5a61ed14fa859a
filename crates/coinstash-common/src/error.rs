//! Error types shared across coinstash crates

use thiserror::Error;

/// Result type alias for coinstash operations
pub type Result<T> = std::result::Result<T, CoinstashError>;

/// Errors raised by file and encoding helpers that are not tied to the store
#[derive(Error, Debug)]
pub enum CoinstashError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CoinstashError {
    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}
