//! Common error types for rdpkg

use thiserror::Error;

/// Common result type for rdpkg operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the package builder crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested geography, state or table not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input (bad identifier, malformed record, unsupported year)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
