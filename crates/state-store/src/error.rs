//! Error types for store operations

/// Errors from locked store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The lock could not be acquired within the bounded retry schedule.
    /// Proceeding unlocked would void the store's serialization guarantee,
    /// so this is always surfaced to the caller.
    #[error("lock acquisition timed out after {attempts} attempts: {path}")]
    LockTimeout { path: String, attempts: u32 },

    /// The canonical file exists but does not parse. Never silently reset
    /// to an empty state; recovery policy belongs to the caller.
    #[error("corrupt state file {path}: {detail}")]
    Corrupt { path: String, detail: String },

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;
