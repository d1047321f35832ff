//! Error types for the alert engine.

use database::DatabaseError;
use thiserror::Error;

/// Errors raised while recording alerts or building reports.
#[derive(Debug, Error)]
pub enum AlertError {
    /// Error from the database layer.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Transaction could not be started or committed.
    #[error("transaction error: {0}")]
    Transaction(#[from] sqlx::Error),

    /// Report period not in `YYYY-MM` form.
    #[error("invalid report period: {0}")]
    InvalidPeriod(String),
}

/// Result type for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;
