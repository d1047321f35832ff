//! Delivery channels.

use async_trait::async_trait;
use database::{user, Database, NotificationQueueEntry};
use mailer::{Email, Mailer};
use tracing::info;

use crate::error::Result;

/// Something that can deliver a queued notification to its user.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel name for logs.
    fn name(&self) -> &str;

    /// Deliver one notification.
    async fn deliver(&self, entry: &NotificationQueueEntry) -> Result<()>;
}

#[async_trait]
impl<T: NotificationChannel + ?Sized> NotificationChannel for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn deliver(&self, entry: &NotificationQueueEntry) -> Result<()> {
        (**self).deliver(entry).await
    }
}

/// Sends notifications as email to the user's address.
pub struct EmailChannel {
    mailer: Mailer,
    db: Database,
}

impl EmailChannel {
    pub fn new(mailer: Mailer, db: Database) -> Self {
        Self { mailer, db }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn deliver(&self, entry: &NotificationQueueEntry) -> Result<()> {
        let recipient = user::get_user(self.db.pool(), &entry.user_id).await?;
        let email = Email::new(recipient.email, &entry.title, &entry.message);
        self.mailer.send(&email).await?;
        Ok(())
    }
}

/// Logs notifications instead of delivering them.
#[derive(Debug, Clone, Default)]
pub struct LoggingChannel;

#[async_trait]
impl NotificationChannel for LoggingChannel {
    fn name(&self) -> &str {
        "logging"
    }

    async fn deliver(&self, entry: &NotificationQueueEntry) -> Result<()> {
        info!(
            entry_id = %entry.id,
            user_id = %entry.user_id,
            notification_type = %entry.notification_type,
            "[notification] {}: {}",
            entry.title,
            entry.message
        );
        Ok(())
    }
}

/// Discards every notification.
#[derive(Debug, Clone, Default)]
pub struct NoOpChannel;

#[async_trait]
impl NotificationChannel for NoOpChannel {
    fn name(&self) -> &str {
        "noop"
    }

    async fn deliver(&self, _entry: &NotificationQueueEntry) -> Result<()> {
        Ok(())
    }
}
