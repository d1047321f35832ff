//! # mailer
//!
//! SMTP client for delivering LinkGuard notifications by email.
//!
//! ```no_run
//! use mailer::{Email, Mailer, MailerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mailer::MailerError> {
//!     let config = MailerConfig::from_env()?;
//!     let mailer = Mailer::new(config)?;
//!
//!     let email = Email::new("owner@example.com", "Broken link", "Your link returned HTTP 404.");
//!     mailer.send(&email).await?;
//!
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod types;

pub use client::Mailer;
pub use config::{MailerConfig, TlsMode};
pub use error::MailerError;
pub use types::Email;
