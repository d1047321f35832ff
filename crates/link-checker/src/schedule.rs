//! Periodic check loop.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use database::link_check;
use rand::Rng;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::checker::HealthChecker;
use crate::error::Result;
use crate::probe::Probe;

/// Shortest wait between two passes.
const MIN_DELAY: Duration = Duration::from_secs(1);

impl<P: Probe> HealthChecker<P> {
    /// Run check passes until `shutdown_signal` completes.
    ///
    /// Passes start every `interval`, shifted by up to `jitter` either way.
    /// Each pass must finish within one interval. After a failed pass the
    /// loop waits `error_backoff`, doubling on each further failure, capped
    /// at `interval`.
    pub async fn run_with_shutdown<S>(&self, shutdown_signal: S) -> Result<()>
    where
        S: Future<Output = ()> + Send,
    {
        let config = self.config().clone();
        info!(
            interval_secs = config.interval.as_secs(),
            max_concurrent = config.max_concurrent,
            batch_limit = config.batch_limit,
            "Starting health checker"
        );

        tokio::pin!(shutdown_signal);
        let mut consecutive_errors = 0u32;

        loop {
            let deadline = Instant::now() + config.interval;

            let delay = tokio::select! {
                biased;

                () = &mut shutdown_signal => {
                    info!("Shutdown signal received, stopping health checker");
                    return Ok(());
                }

                result = self.run_pass(Some(deadline)) => match result {
                    Ok(_) => {
                        consecutive_errors = 0;
                        self.after_pass().await;
                        jittered(config.interval, config.jitter)
                    }
                    Err(e) => {
                        consecutive_errors += 1;
                        self.record_failed_pass();
                        let delay = error_backoff(config.error_backoff, consecutive_errors, config.interval);
                        error!(
                            error = %e,
                            consecutive_errors,
                            retry_in_secs = delay.as_secs(),
                            "Check pass failed"
                        );
                        delay
                    }
                },
            };

            debug!(next_pass_in_secs = delay.as_secs(), "Waiting for next pass");

            tokio::select! {
                biased;

                () = &mut shutdown_signal => {
                    info!("Shutdown signal received, stopping health checker");
                    return Ok(());
                }

                () = sleep(delay) => {}
            }
        }
    }

    /// Housekeeping after a successful pass.
    async fn after_pass(&self) {
        let now = Utc::now();
        self.alerts().throttler().cleanup(now);

        let cutoff = now - self.config().history_retention;
        match link_check::prune_before(self.database().pool(), cutoff).await {
            Ok(0) => {}
            Ok(pruned) => debug!(pruned, "Pruned check history"),
            Err(e) => warn!(error = %e, "Failed to prune check history"),
        }
    }
}

/// `interval` shifted by a random amount within `±jitter`.
pub(crate) fn jittered(interval: Duration, jitter: Duration) -> Duration {
    let spread = jitter.as_millis() as i64;
    if spread == 0 {
        return interval.max(MIN_DELAY);
    }
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    let millis = (interval.as_millis() as i64 + offset).max(MIN_DELAY.as_millis() as i64);
    Duration::from_millis(millis as u64)
}

/// `base * 2^(failures - 1)`, capped at `cap`.
pub(crate) fn error_backoff(base: Duration, failures: u32, cap: Duration) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    base.saturating_mul(2u32.pow(exponent)).min(cap).max(MIN_DELAY)
}
