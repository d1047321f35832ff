//! Check passes over the link registry.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use alerts::{AlertEngine, HealthEvent};
use chrono::Utc;
use database::{link, link_check, Database, DatabaseError, Link, LinkStatus, NewLinkCheck};
use futures::stream::{self, StreamExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{CheckerError, Result};
use crate::probe::Probe;
use crate::state::next_state;

/// Configuration for the health checker.
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Probes running at once.
    pub max_concurrent: usize,
    /// Links checked per pass at most.
    pub batch_limit: usize,
    /// Consecutive failures before an active link is marked broken.
    pub failure_threshold: i64,
    /// Time between passes. Also the deadline for a pass.
    pub interval: Duration,
    /// Random spread added to or removed from each interval.
    pub jitter: Duration,
    /// First delay after a failed pass; doubles up to `interval`.
    pub error_backoff: Duration,
    /// Check history older than this is pruned after each pass.
    pub history_retention: chrono::Duration,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            batch_limit: 100,
            failure_threshold: 3,
            interval: Duration::from_secs(60 * 60),
            jitter: Duration::from_secs(30),
            error_backoff: Duration::from_secs(5 * 60),
            history_retention: chrono::Duration::days(90),
        }
    }
}

/// What happened to one link during a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRecord {
    pub link_id: String,
    pub previous_status: LinkStatus,
    pub status: LinkStatus,
    pub status_code: Option<u16>,
    pub response_time: Duration,
    pub healthy: bool,
    pub consecutive_failures: i64,
}

impl CheckRecord {
    /// Whether the check changed the link's status.
    pub fn transitioned(&self) -> bool {
        self.previous_status != self.status
    }
}

/// Summary of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Links due at the start of the pass (after the batch limit).
    pub due: usize,
    pub checked: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub became_broken: usize,
    pub recovered: usize,
    /// Links removed or deleted while the pass ran.
    pub skipped: usize,
    pub errors: usize,
    /// Probes still running when the deadline passed.
    pub abandoned: usize,
    pub duration: Duration,
    total_response_time: Duration,
}

impl PassReport {
    fn record(&mut self, record: &CheckRecord) {
        self.checked += 1;
        self.total_response_time += record.response_time;
        if record.healthy {
            self.healthy += 1;
        } else {
            self.unhealthy += 1;
        }
        match (record.previous_status, record.status) {
            (LinkStatus::Active, LinkStatus::Broken) => self.became_broken += 1,
            (LinkStatus::Broken, LinkStatus::Active) => self.recovered += 1,
            _ => {}
        }
    }

    /// Mean probe time over checked links.
    pub fn avg_response_time(&self) -> Option<Duration> {
        let checked = u32::try_from(self.checked).ok().filter(|n| *n > 0)?;
        Some(self.total_response_time / checked)
    }
}

/// Totals across all passes since startup, including passes with nothing due.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckerStats {
    pub passes: u64,
    pub checks: u64,
    pub healthy: u64,
    pub unhealthy: u64,
    pub errors: u64,
    pub abandoned: u64,
    pub failed_passes: u64,
}

impl CheckerStats {
    fn record(&mut self, report: &PassReport) {
        self.passes += 1;
        self.checks += report.checked as u64;
        self.healthy += report.healthy as u64;
        self.unhealthy += report.unhealthy as u64;
        self.errors += report.errors as u64;
        self.abandoned += report.abandoned as u64;
    }

    /// Share of checks that found the link healthy, 0.0 to 1.0.
    pub fn success_rate(&self) -> f64 {
        if self.checks == 0 {
            return 0.0;
        }
        self.healthy as f64 / self.checks as f64
    }
}

/// Runs link checks and persists their results.
pub struct HealthChecker<P: Probe> {
    db: Database,
    probe: P,
    alerts: Arc<AlertEngine>,
    config: CheckerConfig,
    stats: Mutex<CheckerStats>,
}

impl<P: Probe> HealthChecker<P> {
    /// Create a new health checker.
    pub fn new(db: Database, probe: P, alerts: Arc<AlertEngine>, config: CheckerConfig) -> Self {
        Self {
            db,
            probe,
            alerts,
            config,
            stats: Mutex::new(CheckerStats::default()),
        }
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Get a reference to the database.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Get a reference to the alert engine.
    pub fn alerts(&self) -> &AlertEngine {
        &self.alerts
    }

    /// Totals across all passes so far.
    pub fn stats(&self) -> CheckerStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn record_failed_pass(&self) {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).failed_passes += 1;
    }

    /// Check every due link once.
    ///
    /// Links are taken most-failing first, then least recently checked, up
    /// to the batch limit. A failure on one link is logged and counted; it
    /// never stops the pass. When `deadline` passes, probes still in flight
    /// are dropped and their links keep their previous state.
    pub async fn run_pass(&self, deadline: Option<Instant>) -> Result<PassReport> {
        let started = std::time::Instant::now();
        let now = Utc::now();

        let due: Vec<Link> = link::get_active_links(self.db.pool())
            .await?
            .into_iter()
            .filter(|l| l.is_due(now))
            .take(self.config.batch_limit)
            .collect();

        let mut report = PassReport {
            due: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            debug!("No links due for checking");
            self.stats
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .record(&report);
            return Ok(report);
        }

        info!(due = report.due, "Starting check pass");

        let mut results = stream::iter(due)
            .map(|l| async move {
                let link_id = l.id.clone();
                (link_id, self.check_one(l).await)
            })
            .buffer_unordered(self.config.max_concurrent.max(1));

        loop {
            let next = match deadline {
                Some(deadline) => match timeout_at(deadline, results.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!("Check pass deadline reached, abandoning in-flight probes");
                        break;
                    }
                },
                None => results.next().await,
            };

            let Some((link_id, result)) = next else {
                break;
            };
            match result {
                Ok(Some(record)) => report.record(&record),
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    error!(link_id = %link_id, error = %e, "Failed to check link");
                    report.errors += 1;
                }
            }
        }
        drop(results);

        report.abandoned = report.due - report.checked - report.skipped - report.errors;
        report.duration = started.elapsed();

        let stats = {
            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            stats.record(&report);
            stats.clone()
        };

        info!(
            checked = report.checked,
            healthy = report.healthy,
            unhealthy = report.unhealthy,
            became_broken = report.became_broken,
            recovered = report.recovered,
            errors = report.errors,
            abandoned = report.abandoned,
            avg_response_ms = report.avg_response_time().map(|d| d.as_millis() as u64),
            duration_ms = report.duration.as_millis() as u64,
            success_rate = stats.success_rate(),
            "Check pass complete"
        );

        Ok(report)
    }

    /// Check one link now, regardless of when it was last checked.
    #[instrument(skip(self))]
    pub async fn check_link(&self, link_id: &str) -> Result<CheckRecord> {
        let l = link::get_link(self.db.pool(), link_id).await?;
        if !l.status.is_checkable() {
            return Err(CheckerError::LinkRemoved(link_id.to_string()));
        }

        self.check_one(l)
            .await?
            .ok_or_else(|| CheckerError::LinkRemoved(link_id.to_string()))
    }

    /// Probe a link and persist the result.
    ///
    /// Returns `None` when the link was removed or deleted while the probe
    /// ran; nothing is written in that case.
    async fn check_one(&self, l: Link) -> Result<Option<CheckRecord>> {
        let outcome = self.probe.probe(&l.url).await;
        let checked_at = Utc::now();

        let mut tx = self.db.begin().await?;

        // Re-read inside the transaction; the link may have changed during the probe.
        let current = match link::get_link(&mut *tx, &l.id).await {
            Ok(current) => current,
            Err(DatabaseError::NotFound { .. }) => {
                debug!(link_id = %l.id, "Link deleted during check");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if !current.status.is_checkable() {
            debug!(link_id = %l.id, "Link removed during check");
            return Ok(None);
        }

        let transition = next_state(
            current.status,
            current.consecutive_failures,
            &outcome,
            self.config.failure_threshold,
        );
        let reason = outcome.reason();
        let status_code = outcome.status_code.map(i64::from);

        link::record_check_result(
            &mut *tx,
            &current.id,
            transition.status,
            status_code,
            Some(&reason),
            transition.consecutive_failures,
            checked_at,
        )
        .await?;

        let check = NewLinkCheck {
            link_id: current.id.clone(),
            status_code,
            response_time_ms: outcome.response_time.as_millis() as i64,
            is_available: outcome.is_healthy(),
            content_type: outcome.content_type.clone(),
            final_url: outcome.final_url.clone(),
            redirect_count: i64::from(outcome.redirect_count),
            failure_kind: outcome.failure.map(|f| f.as_str().to_string()),
            error_message: outcome.error_message.clone(),
            check_method: outcome.method.as_str().to_string(),
        };
        link_check::insert_check(&mut *tx, &check, checked_at).await?;

        if transition.status != current.status {
            let event = HealthEvent {
                status_code,
                reason: Some(&reason),
                checked_at,
            };
            self.alerts
                .on_health_change(&mut *tx, &current, current.status, transition.status, &event)
                .await?;
        }

        tx.commit().await?;

        match (current.status, transition.status) {
            (LinkStatus::Active, LinkStatus::Broken) => {
                warn!(link_id = %current.id, url = %current.url, reason = %reason, "Link is broken")
            }
            (LinkStatus::Broken, LinkStatus::Active) => {
                info!(link_id = %current.id, url = %current.url, "Link recovered")
            }
            _ => debug!(
                link_id = %current.id,
                reason = %reason,
                failures = transition.consecutive_failures,
                "Link checked"
            ),
        }

        Ok(Some(CheckRecord {
            link_id: current.id,
            previous_status: current.status,
            status: transition.status,
            status_code: outcome.status_code,
            response_time: outcome.response_time,
            healthy: outcome.is_healthy(),
            consecutive_failures: transition.consecutive_failures,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeMethod, ProbeOutcome};
    use async_trait::async_trait;
    use database::models::NewLink;
    use database::{alert, notification_queue, user, AlertType, NotificationType};
    use std::collections::{HashMap, VecDeque};

    /// Answers each URL from a script; unscripted URLs are healthy.
    #[derive(Default)]
    struct ScriptedProbe {
        script: Mutex<HashMap<String, VecDeque<u16>>>,
        delays: HashMap<String, Duration>,
    }

    impl ScriptedProbe {
        fn respond(self, url: &str, codes: &[u16]) -> Self {
            self.script
                .lock()
                .unwrap()
                .insert(url.to_string(), codes.iter().copied().collect());
            self
        }

        fn delay(mut self, url: &str, delay: Duration) -> Self {
            self.delays.insert(url.to_string(), delay);
            self
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn probe(&self, url: &str) -> ProbeOutcome {
            if let Some(delay) = self.delays.get(url) {
                tokio::time::sleep(*delay).await;
            }
            let code = self
                .script
                .lock()
                .unwrap()
                .get_mut(url)
                .and_then(VecDeque::pop_front)
                .unwrap_or(200);
            ProbeOutcome::from_status(code, ProbeMethod::Head, Duration::from_millis(20))
        }
    }

    async fn setup() -> (Database, String) {
        let db = Database::in_memory().await.unwrap();
        let u = user::create_user(db.pool(), "checker@example.com", None)
            .await
            .unwrap();
        (db, u.id)
    }

    async fn add_link(db: &Database, user_id: &str, url: &str) -> Link {
        let new_link = NewLink {
            user_id: user_id.to_string(),
            url: url.to_string(),
            title: url.to_string(),
            ..Default::default()
        };
        link::create_link(db.pool(), &new_link).await.unwrap()
    }

    fn checker(db: &Database, probe: ScriptedProbe) -> HealthChecker<ScriptedProbe> {
        HealthChecker::new(
            db.clone(),
            probe,
            Arc::new(AlertEngine::default()),
            CheckerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_three_server_errors_break_link() {
        let (db, user_id) = setup().await;
        let l = add_link(&db, &user_id, "https://shop.example.com/a").await;
        let checker = checker(&db, ScriptedProbe::default().respond(&l.url, &[500, 500, 500]));

        for expected in [LinkStatus::Active, LinkStatus::Active, LinkStatus::Broken] {
            let record = checker.check_link(&l.id).await.unwrap();
            assert_eq!(record.status, expected);
        }

        let stored = link::get_link(db.pool(), &l.id).await.unwrap();
        assert_eq!(stored.status, LinkStatus::Broken);
        assert_eq!(stored.last_status, Some(500));
        assert_eq!(stored.consecutive_failures, 3);

        let alerts = alert::list_alerts_for_link(db.pool(), &l.id).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::BrokenLink);

        let history = link_check::recent_checks(db.pool(), &l.id, 10).await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|c| !c.is_available));
    }

    #[tokio::test]
    async fn test_not_found_breaks_immediately_then_recovers() {
        let (db, user_id) = setup().await;
        let l = add_link(&db, &user_id, "https://shop.example.com/gone").await;
        let checker = checker(&db, ScriptedProbe::default().respond(&l.url, &[404, 200]));

        let record = checker.check_link(&l.id).await.unwrap();
        assert_eq!(record.status, LinkStatus::Broken);
        assert!(record.transitioned());

        let record = checker.check_link(&l.id).await.unwrap();
        assert_eq!(record.status, LinkStatus::Active);
        assert_eq!(record.consecutive_failures, 0);

        let alerts = alert::list_alerts_for_link(db.pool(), &l.id).await.unwrap();
        let kinds: Vec<_> = alerts.iter().map(|a| a.alert_type).collect();
        assert_eq!(kinds, vec![AlertType::BrokenLink, AlertType::LinkRecovered]);

        let queued = notification_queue::list_for_user(db.pool(), &user_id).await.unwrap();
        assert_eq!(queued.len(), 2);
    }

    #[tokio::test]
    async fn test_link_breaking_twice_queues_twice() {
        let (db, user_id) = setup().await;
        let l = add_link(&db, &user_id, "https://shop.example.com/flaky").await;
        let checker = checker(&db, ScriptedProbe::default().respond(&l.url, &[404, 200, 404]));

        for _ in 0..3 {
            checker.check_link(&l.id).await.unwrap();
        }

        let queued = notification_queue::list_for_user(db.pool(), &user_id).await.unwrap();
        let broken = queued
            .iter()
            .filter(|e| e.notification_type == NotificationType::BrokenLink)
            .count();
        assert_eq!(broken, 2);
        assert_eq!(queued.len(), 3);
    }

    #[tokio::test]
    async fn test_removed_links_untouched() {
        let (db, user_id) = setup().await;
        let l = add_link(&db, &user_id, "https://shop.example.com/old").await;
        link::mark_removed(db.pool(), &l.id).await.unwrap();
        let before = link::get_link(db.pool(), &l.id).await.unwrap();

        let checker = checker(&db, ScriptedProbe::default().respond(&l.url, &[500]));
        let report = checker.run_pass(None).await.unwrap();
        assert_eq!(report.due, 0);
        assert_eq!(checker.stats().passes, 1);

        let result = checker.check_link(&l.id).await;
        assert!(matches!(result, Err(CheckerError::LinkRemoved(_))));

        let after = link::get_link(db.pool(), &l.id).await.unwrap();
        assert_eq!(after.status, LinkStatus::Removed);
        assert_eq!(after.last_checked, before.last_checked);
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[tokio::test]
    async fn test_pass_skips_links_not_due() {
        let (db, user_id) = setup().await;
        let fresh = add_link(&db, &user_id, "https://shop.example.com/fresh").await;
        add_link(&db, &user_id, "https://shop.example.com/new").await;

        let mut conn = db.pool().acquire().await.unwrap();
        link::update_status(&mut *conn, &fresh.id, LinkStatus::Active, Some(200), None, Utc::now())
            .await
            .unwrap();
        drop(conn);

        let checker = checker(&db, ScriptedProbe::default());
        let report = checker.run_pass(None).await.unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(report.checked, 1);
        assert_eq!(report.healthy, 1);
        assert!(report.avg_response_time().is_some());

        let stats = checker.stats();
        assert_eq!(stats.passes, 1);
        assert_eq!(stats.success_rate(), 1.0);
    }

    #[tokio::test]
    async fn test_deadline_abandons_slow_probes() {
        let (db, user_id) = setup().await;
        let fast = add_link(&db, &user_id, "https://fast.example.com/").await;
        let slow = add_link(&db, &user_id, "https://slow.example.com/").await;

        let probe = ScriptedProbe::default()
            .respond(&slow.url, &[500])
            .delay(&slow.url, Duration::from_secs(10));
        let checker = checker(&db, probe);

        let deadline = Instant::now() + Duration::from_millis(300);
        let report = checker.run_pass(Some(deadline)).await.unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.abandoned, 1);

        let fast = link::get_link(db.pool(), &fast.id).await.unwrap();
        assert!(fast.last_checked.is_some());
        let slow = link::get_link(db.pool(), &slow.id).await.unwrap();
        assert_eq!(slow.last_checked, None);
        assert_eq!(slow.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_unknown_link() {
        let (db, _) = setup().await;
        let checker = checker(&db, ScriptedProbe::default());
        let result = checker.check_link("missing").await;
        assert!(matches!(
            result,
            Err(CheckerError::Database(DatabaseError::NotFound { .. }))
        ));
    }

    #[test]
    fn test_report_counts_transitions() {
        let mut report = PassReport::default();
        let record = CheckRecord {
            link_id: "l".to_string(),
            previous_status: LinkStatus::Active,
            status: LinkStatus::Broken,
            status_code: None,
            response_time: Duration::from_millis(40),
            healthy: false,
            consecutive_failures: 1,
        };
        report.record(&record);
        assert_eq!(report.became_broken, 1);
        assert_eq!(report.unhealthy, 1);
        assert_eq!(report.avg_response_time(), Some(Duration::from_millis(40)));
    }
}
