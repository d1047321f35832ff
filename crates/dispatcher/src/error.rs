//! Error types for the dispatcher.

use std::time::Duration;

use database::DatabaseError;
use mailer::MailerError;
use thiserror::Error;

/// Errors raised while delivering notifications.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Error from the database layer.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Email could not be sent.
    #[error("mailer error: {0}")]
    Mailer(#[from] MailerError),

    /// Delivery did not finish in time.
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    /// Channel-specific delivery failure.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Result type for dispatcher operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
