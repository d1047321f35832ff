//! Monthly report records. At most one per user per calendar month.

use chrono::Utc;
use sqlx::SqliteExecutor;

use crate::error::Result;
use crate::models::MonthlyReport;

/// Report figures for one user and period, before persistence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportFigures {
    pub total_links: i64,
    pub healthy_links: i64,
    pub broken_links: i64,
    pub new_issues: i64,
    pub clicks: i64,
    pub revenue: f64,
}

/// Store a report unless one already exists for this user and period.
///
/// Returns `None` when the period was already reported.
pub async fn insert_once<'e, E>(
    executor: E,
    user_id: &str,
    period: &str,
    figures: &ReportFigures,
) -> Result<Option<MonthlyReport>>
where
    E: SqliteExecutor<'e>,
{
    let report = MonthlyReport {
        id: crate::new_id(),
        user_id: user_id.to_string(),
        period: period.to_string(),
        total_links: figures.total_links,
        healthy_links: figures.healthy_links,
        broken_links: figures.broken_links,
        new_issues: figures.new_issues,
        clicks: figures.clicks,
        revenue: figures.revenue,
        created_at: Utc::now(),
    };

    let result = sqlx::query(
        r#"
        INSERT INTO monthly_reports (id, user_id, period, total_links, healthy_links,
                                     broken_links, new_issues, clicks, revenue, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id, period) DO NOTHING
        "#,
    )
    .bind(&report.id)
    .bind(&report.user_id)
    .bind(&report.period)
    .bind(report.total_links)
    .bind(report.healthy_links)
    .bind(report.broken_links)
    .bind(report.new_issues)
    .bind(report.clicks)
    .bind(report.revenue)
    .bind(report.created_at)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }

    Ok(Some(report))
}

/// List a user's reports, newest period first.
pub async fn list_reports<'e, E>(executor: E, user_id: &str) -> Result<Vec<MonthlyReport>>
where
    E: SqliteExecutor<'e>,
{
    let reports = sqlx::query_as::<_, MonthlyReport>(
        r#"
        SELECT id, user_id, period, total_links, healthy_links, broken_links,
               new_issues, clicks, revenue, created_at
        FROM monthly_reports
        WHERE user_id = ?
        ORDER BY period DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(executor)
    .await?;

    Ok(reports)
}
