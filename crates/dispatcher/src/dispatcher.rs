//! Queue draining.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use database::{notification_queue, Database, NotificationQueueEntry};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::channel::NotificationChannel;
use crate::error::{DispatchError, Result};

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Entries drained per run.
    pub batch_size: usize,
    /// Pause between drain runs.
    pub interval: Duration,
    /// Time allowed for one delivery.
    pub delivery_timeout: Duration,
    /// Claims older than this are considered abandoned.
    pub stale_claim_after: chrono::Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            interval: Duration::from_secs(30),
            delivery_timeout: Duration::from_secs(30),
            stale_claim_after: chrono::Duration::minutes(15),
        }
    }
}

/// Summary of one drain run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Due entries seen.
    pub candidates: usize,
    pub sent: usize,
    pub failed: usize,
    /// Entries another dispatcher claimed first.
    pub lost_claims: usize,
    /// Entries whose claim or outcome could not be written.
    pub errors: usize,
}

impl DrainReport {
    /// Entries this run delivered or failed.
    pub fn processed(&self) -> usize {
        self.sent + self.failed
    }
}

/// Delivers queued notifications through a channel.
pub struct Dispatcher<C: NotificationChannel> {
    db: Database,
    channel: C,
    config: DispatcherConfig,
}

impl<C: NotificationChannel> Dispatcher<C> {
    /// Create a new dispatcher.
    pub fn new(db: Database, channel: C, config: DispatcherConfig) -> Self {
        Self { db, channel, config }
    }

    /// Create a dispatcher with default configuration.
    pub fn with_defaults(db: Database, channel: C) -> Self {
        Self::new(db, channel, DispatcherConfig::default())
    }

    /// Get a reference to the channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Deliver up to `batch_size` due entries, oldest schedule first.
    ///
    /// Each entry is claimed before delivery and skipped if the claim is
    /// lost. Delivery errors and timeouts mark the entry `failed`. A database
    /// error on one entry is logged and counted, and the run moves on; an
    /// entry whose outcome could not be written stays `processing` until
    /// [`Dispatcher::release_stale_claims`] fails it.
    pub async fn drain_pending(&self, batch_size: usize) -> Result<DrainReport> {
        let limit = i64::try_from(batch_size).unwrap_or(i64::MAX);
        let candidates = notification_queue::due_candidates(self.db.pool(), Utc::now(), limit).await?;

        let mut report = DrainReport {
            candidates: candidates.len(),
            ..Default::default()
        };

        for entry in candidates {
            match notification_queue::claim(self.db.pool(), &entry.id, Utc::now()).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(entry_id = %entry.id, "Entry already claimed, skipping");
                    report.lost_claims += 1;
                    continue;
                }
                Err(e) => {
                    error!(entry_id = %entry.id, error = %e, "Failed to claim notification");
                    report.errors += 1;
                    continue;
                }
            }

            let outcome = self.deliver(&entry).await;
            let delivered = outcome.is_ok();
            let written = match &outcome {
                Ok(()) => notification_queue::mark_sent(self.db.pool(), &entry.id, Utc::now()).await,
                Err(e) => {
                    notification_queue::mark_failed(self.db.pool(), &entry.id, &e.to_string(), Utc::now())
                        .await
                }
            };

            if let Err(e) = written {
                error!(
                    entry_id = %entry.id,
                    delivered,
                    error = %e,
                    "Failed to record notification outcome"
                );
                report.errors += 1;
                continue;
            }

            match outcome {
                Ok(()) => {
                    info!(
                        entry_id = %entry.id,
                        user_id = %entry.user_id,
                        channel = self.channel.name(),
                        "Notification sent"
                    );
                    report.sent += 1;
                }
                Err(e) => {
                    warn!(
                        entry_id = %entry.id,
                        user_id = %entry.user_id,
                        channel = self.channel.name(),
                        error = %e,
                        "Notification failed"
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn deliver(&self, entry: &NotificationQueueEntry) -> Result<()> {
        match timeout(self.config.delivery_timeout, self.channel.deliver(entry)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(DispatchError::Timeout(self.config.delivery_timeout)),
        }
    }

    /// Fail entries whose claim is older than `stale_claim_after`.
    ///
    /// They are never returned to `pending`: the message may have gone out
    /// before the claimer died.
    pub async fn release_stale_claims(&self) -> Result<u64> {
        let now = Utc::now();
        let released = notification_queue::release_stale_claims(
            self.db.pool(),
            now - self.config.stale_claim_after,
            now,
        )
        .await?;

        if released > 0 {
            warn!(released, "Failed stale notification claims");
        }
        Ok(released)
    }

    /// Queue a failed entry again as a new pending entry, due now.
    pub async fn requeue(&self, entry_id: &str) -> Result<NotificationQueueEntry> {
        let entry = notification_queue::requeue(self.db.pool(), entry_id, Utc::now()).await?;
        info!(failed_entry = entry_id, entry_id = %entry.id, "Requeued notification");
        Ok(entry)
    }

    /// Drain the queue every `interval` until `shutdown_signal` completes.
    ///
    /// A run in progress is finished before shutting down.
    pub async fn run_with_shutdown<S>(&self, shutdown_signal: S) -> Result<()>
    where
        S: Future<Output = ()> + Send,
    {
        info!(
            channel = self.channel.name(),
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            "Starting notification dispatcher"
        );

        tokio::pin!(shutdown_signal);

        loop {
            if let Err(e) = self.release_stale_claims().await {
                error!(error = %e, "Failed to release stale claims");
            }

            match self.drain_pending(self.config.batch_size).await {
                Ok(report) if report.candidates > 0 => info!(
                    sent = report.sent,
                    failed = report.failed,
                    lost_claims = report.lost_claims,
                    errors = report.errors,
                    "Drained notification queue"
                ),
                Ok(_) => debug!("No notifications due"),
                Err(e) => error!(error = %e, "Failed to drain notification queue"),
            }

            tokio::select! {
                biased;

                () = &mut shutdown_signal => {
                    info!("Shutdown signal received, stopping notification dispatcher");
                    return Ok(());
                }

                () = sleep(self.config.interval) => {}
            }
        }
    }
}
