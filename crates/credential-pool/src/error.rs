//! Error types for pool operations

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("rotation store error: {0}")]
    Store(#[from] state_store::Error),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("credential materialization failed: {0}")]
    Sink(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
