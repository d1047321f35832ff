//! Notification dispatcher for LinkGuard.
//!
//! Drains due entries from the notification queue and hands them to a
//! [`NotificationChannel`]. Every entry is claimed (`pending -> processing`)
//! before delivery, so two dispatchers never deliver the same entry. The
//! result is final: `sent` or `failed` with the error kept on the row.
//! Nothing is retried automatically; an operator can [`Dispatcher::requeue`]
//! a failed entry.

mod channel;
mod dispatcher;
mod error;

pub use channel::{EmailChannel, LoggingChannel, NoOpChannel, NotificationChannel};
pub use dispatcher::{Dispatcher, DispatcherConfig, DrainReport};
pub use error::{DispatchError, Result};
