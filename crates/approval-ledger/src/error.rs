//! Error types for ledger operations

/// Errors from approval ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ledger store error: {0}")]
    Store(#[from] state_store::Error),
}

/// Result alias for ledger operations.
pub type Result<T> = std::result::Result<T, Error>;
