//! Monthly link health reports.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use database::monthly_report::{self, ReportFigures};
use database::{
    alert, alert_setting, link, link_check, notification_queue, user, AlertType, Database,
    LinkStatus, NotificationType,
};
use tracing::{debug, error, info};

use crate::engine::AlertEngine;
use crate::error::{AlertError, Result};

/// A calendar month, written `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportPeriod {
    year: i32,
    month: u32,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl ReportPeriod {
    /// Build a period for the given year and month (1-12).
    pub fn new(year: i32, month: u32) -> Result<Self> {
        let invalid = || AlertError::InvalidPeriod(format!("{:04}-{:02}", year, month));

        let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
        let (next_year, next_month) = if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        };
        let end = NaiveDate::from_ymd_opt(next_year, next_month, 1).ok_or_else(invalid)?;

        Ok(Self {
            year,
            month,
            start: start.and_hms_opt(0, 0, 0).ok_or_else(invalid)?.and_utc(),
            end: end.and_hms_opt(0, 0, 0).ok_or_else(invalid)?.and_utc(),
        })
    }

    /// The month before the one containing `now`.
    pub fn previous(now: DateTime<Utc>) -> Result<Self> {
        if now.month() == 1 {
            Self::new(now.year() - 1, 12)
        } else {
            Self::new(now.year(), now.month() - 1)
        }
    }

    /// First instant of the month.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// First instant of the following month.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

impl fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for ReportPeriod {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || AlertError::InvalidPeriod(s.to_string());
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Self::new(year, month).map_err(|_| invalid())
    }
}

/// Outcome of one monthly report run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportRun {
    /// Reports stored and queued.
    pub generated: usize,
    /// Users already reported for this period.
    pub already_reported: usize,
    /// Users with no tracked links.
    pub no_links: usize,
    /// Users with reports or email switched off.
    pub disabled: usize,
    /// Users whose report failed; the run carried on with the others.
    pub errors: usize,
}

/// What happened for one user.
enum UserReport {
    Generated,
    AlreadyReported,
    NoLinks,
    Disabled,
}

impl AlertEngine {
    /// Generate the report for `period` for every user who wants one.
    ///
    /// Safe to call repeatedly: each user gets at most one report per period.
    /// A failure for one user is logged and counted; it never stops the run.
    pub async fn run_monthly_reports(&self, db: &Database, period: ReportPeriod) -> Result<ReportRun> {
        let mut run = ReportRun::default();
        let users = user::list_users(db.pool()).await?;

        for u in users {
            match self.report_user(db, &u.id, period).await {
                Ok(UserReport::Generated) => run.generated += 1,
                Ok(UserReport::AlreadyReported) => run.already_reported += 1,
                Ok(UserReport::NoLinks) => run.no_links += 1,
                Ok(UserReport::Disabled) => run.disabled += 1,
                Err(e) => {
                    error!(user_id = %u.id, period = %period, error = %e, "Failed to generate monthly report");
                    run.errors += 1;
                }
            }
        }

        info!(
            period = %period,
            generated = run.generated,
            already_reported = run.already_reported,
            no_links = run.no_links,
            disabled = run.disabled,
            errors = run.errors,
            "Monthly report run complete"
        );

        Ok(run)
    }

    async fn report_user(&self, db: &Database, user_id: &str, period: ReportPeriod) -> Result<UserReport> {
        let settings = alert_setting::get_settings(db.pool(), user_id).await?;
        if !settings.allows(NotificationType::MonthlyReport) {
            return Ok(UserReport::Disabled);
        }

        let links: Vec<_> = link::list_links_for_user(db.pool(), user_id)
            .await?
            .into_iter()
            .filter(|l| l.status != LinkStatus::Removed)
            .collect();
        if links.is_empty() {
            return Ok(UserReport::NoLinks);
        }

        let issues_from = alert::count_since(db.pool(), user_id, AlertType::BrokenLink, period.start())
            .await?;
        let issues_after = alert::count_since(db.pool(), user_id, AlertType::BrokenLink, period.end())
            .await?;

        let figures = ReportFigures {
            total_links: links.len() as i64,
            healthy_links: links.iter().filter(|l| l.status == LinkStatus::Active).count() as i64,
            broken_links: links.iter().filter(|l| l.status == LinkStatus::Broken).count() as i64,
            new_issues: issues_from - issues_after,
            clicks: links.iter().map(|l| l.clicks).sum(),
            revenue: links.iter().map(|l| l.revenue).sum(),
        };
        let (checks, available) =
            link_check::availability_between(db.pool(), user_id, period.start(), period.end()).await?;

        let mut tx = db.begin().await?;
        let period_label = period.to_string();
        let Some(report) = monthly_report::insert_once(&mut *tx, user_id, &period_label, &figures).await?
        else {
            debug!(user_id, period = %period, "Report already generated");
            return Ok(UserReport::AlreadyReported);
        };

        let title = format!("Your LinkGuard report for {}", period);
        let body = report_body(&figures, checks, available);
        notification_queue::enqueue(
            &mut *tx,
            user_id,
            NotificationType::MonthlyReport,
            &title,
            &body,
            Utc::now(),
        )
        .await?;
        tx.commit().await?;

        debug!(user_id, report_id = %report.id, "Queued monthly report");
        Ok(UserReport::Generated)
    }

    /// Report on the previous month every `interval` until `shutdown_signal` completes.
    ///
    /// Every run after the first in a month finds all users already reported.
    pub async fn run_reports_with_shutdown<S>(
        &self,
        db: &Database,
        interval: Duration,
        shutdown_signal: S,
    ) -> Result<()>
    where
        S: Future<Output = ()> + Send,
    {
        info!(interval_secs = interval.as_secs(), "Starting monthly report scheduler");
        tokio::pin!(shutdown_signal);

        loop {
            let outcome = match ReportPeriod::previous(Utc::now()) {
                Ok(period) => self.run_monthly_reports(db, period).await,
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                error!(error = %e, "Monthly report run failed");
            }

            tokio::select! {
                biased;

                () = &mut shutdown_signal => {
                    info!("Shutdown signal received, stopping monthly report scheduler");
                    return Ok(());
                }

                () = tokio::time::sleep(interval) => {}
            }
        }
    }
}

fn report_body(figures: &ReportFigures, checks: i64, available: i64) -> String {
    let mut body = format!(
        "Links tracked: {}\nHealthy: {}\nBroken: {}\nNew issues: {}\n",
        figures.total_links, figures.healthy_links, figures.broken_links, figures.new_issues
    );
    if checks > 0 {
        let uptime = available as f64 / checks as f64 * 100.0;
        body.push_str(&format!("Availability: {:.1}% over {} checks\n", uptime, checks));
    }
    body.push_str(&format!(
        "Clicks: {}\nRevenue: {:.2}\n",
        figures.clicks, figures.revenue
    ));
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use database::models::NewLink;
    use database::NewLinkCheck;

    #[test]
    fn test_period_parse() {
        let period: ReportPeriod = "2026-09".parse().unwrap();
        assert_eq!(period.to_string(), "2026-09");
        assert_eq!(period.start(), Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap());
        assert_eq!(period.end(), Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap());

        assert!("2026-13".parse::<ReportPeriod>().is_err());
        assert!("2026-9".parse::<ReportPeriod>().is_err());
        assert!("september".parse::<ReportPeriod>().is_err());
    }

    #[test]
    fn test_previous_period_wraps_year() {
        let jan = Utc.with_ymd_and_hms(2027, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(ReportPeriod::previous(jan).unwrap().to_string(), "2026-12");

        let dec = ReportPeriod::new(2026, 12).unwrap();
        assert_eq!(dec.end(), Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_reports_once_per_period() {
        let db = Database::in_memory().await.unwrap();
        let with_links = user::create_user(db.pool(), "links@example.com", None)
            .await
            .unwrap();
        user::create_user(db.pool(), "empty@example.com", None)
            .await
            .unwrap();
        link::create_link(
            db.pool(),
            &NewLink {
                user_id: with_links.id.clone(),
                url: "https://example.com/a".to_string(),
                title: "A".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let engine = AlertEngine::default();
        let period = ReportPeriod::previous(Utc::now()).unwrap();

        let first = engine.run_monthly_reports(&db, period).await.unwrap();
        assert_eq!(first.generated, 1);
        assert_eq!(first.no_links, 1);

        let second = engine.run_monthly_reports(&db, period).await.unwrap();
        assert_eq!(second.generated, 0);
        assert_eq!(second.already_reported, 1);

        let reports = monthly_report::list_reports(db.pool(), &with_links.id).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].total_links, 1);
        assert_eq!(reports[0].healthy_links, 1);

        let queued = notification_queue::list_for_user(db.pool(), &with_links.id)
            .await
            .unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].notification_type, NotificationType::MonthlyReport);
        assert!(queued[0].message.contains("Links tracked: 1"));
    }

    #[tokio::test]
    async fn test_reports_respect_settings() {
        let db = Database::in_memory().await.unwrap();
        let u = user::create_user(db.pool(), "quiet@example.com", None)
            .await
            .unwrap();
        link::create_link(
            db.pool(),
            &NewLink {
                user_id: u.id.clone(),
                url: "https://example.com/b".to_string(),
                title: "B".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let mut settings = alert_setting::get_settings(db.pool(), &u.id).await.unwrap();
        settings.monthly_reports = false;
        alert_setting::update_settings(db.pool(), &settings).await.unwrap();

        let run = AlertEngine::default()
            .run_monthly_reports(&db, ReportPeriod::new(2026, 9).unwrap())
            .await
            .unwrap();
        assert_eq!(run.disabled, 1);
        assert!(monthly_report::list_reports(db.pool(), &u.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_availability_covers_only_the_period() {
        let db = Database::in_memory().await.unwrap();
        let u = user::create_user(db.pool(), "uptime@example.com", None)
            .await
            .unwrap();
        let l = link::create_link(
            db.pool(),
            &NewLink {
                user_id: u.id.clone(),
                url: "https://example.com/c".to_string(),
                title: "C".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let check = |available: bool| NewLinkCheck {
            link_id: l.id.clone(),
            status_code: Some(if available { 200 } else { 500 }),
            is_available: available,
            check_method: "HEAD".to_string(),
            ..Default::default()
        };
        for (available, at) in [
            (false, Utc.with_ymd_and_hms(2026, 8, 31, 23, 59, 0).unwrap()),
            (true, Utc.with_ymd_and_hms(2026, 9, 15, 12, 0, 0).unwrap()),
            (false, Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap()),
        ] {
            link_check::insert_check(db.pool(), &check(available), at).await.unwrap();
        }

        let run = AlertEngine::default()
            .run_monthly_reports(&db, ReportPeriod::new(2026, 9).unwrap())
            .await
            .unwrap();
        assert_eq!(run.generated, 1);

        let queued = notification_queue::list_for_user(db.pool(), &u.id).await.unwrap();
        assert!(queued[0].message.contains("Availability: 100.0% over 1 checks"));
    }

    #[tokio::test]
    async fn test_one_failing_user_does_not_stop_run() {
        let db = Database::in_memory().await.unwrap();
        let broken = user::create_user(db.pool(), "broken@example.com", None)
            .await
            .unwrap();
        let fine = user::create_user(db.pool(), "fine@example.com", None)
            .await
            .unwrap();
        for (owner, url) in [(&broken.id, "https://example.com/d"), (&fine.id, "https://example.com/e")] {
            link::create_link(
                db.pool(),
                &NewLink {
                    user_id: owner.clone(),
                    url: url.to_string(),
                    title: "D".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        }
        sqlx::query("DELETE FROM alert_settings WHERE user_id = ?")
            .bind(&broken.id)
            .execute(db.pool())
            .await
            .unwrap();

        let run = AlertEngine::default()
            .run_monthly_reports(&db, ReportPeriod::new(2026, 9).unwrap())
            .await
            .unwrap();
        assert_eq!(run.errors, 1);
        assert_eq!(run.generated, 1);
        assert_eq!(monthly_report::list_reports(db.pool(), &fine.id).await.unwrap().len(), 1);
    }

    #[test]
    fn test_report_body() {
        let figures = ReportFigures {
            total_links: 4,
            healthy_links: 3,
            broken_links: 1,
            new_issues: 2,
            clicks: 120,
            revenue: 42.5,
        };
        let body = report_body(&figures, 200, 190);
        assert!(body.contains("Availability: 95.0% over 200 checks"));
        assert!(body.contains("Revenue: 42.50"));
        assert!(!report_body(&figures, 0, 0).contains("Availability"));
    }
}
