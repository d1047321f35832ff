//! Error types for the health checker.

use alerts::AlertError;
use database::DatabaseError;
use thiserror::Error;

/// Errors raised by the health checker.
///
/// Probe failures are not errors; they are reported as [`ProbeOutcome`](crate::ProbeOutcome)s.
#[derive(Debug, Error)]
pub enum CheckerError {
    /// Error from the database layer.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Transaction could not be started or committed.
    #[error("transaction error: {0}")]
    Transaction(#[from] sqlx::Error),

    /// Error from the alert engine.
    #[error("alert error: {0}")]
    Alert(#[from] AlertError),

    /// HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Removed links are never checked.
    #[error("link {0} is removed")]
    LinkRemoved(String),
}

/// Result type for checker operations.
pub type Result<T> = std::result::Result<T, CheckerError>;
