//! Check history: one row per completed probe.

use chrono::{DateTime, Utc};
use sqlx::{SqliteExecutor, SqlitePool};

use crate::error::Result;
use crate::models::{LinkCheck, NewLinkCheck};

/// Record a completed probe.
pub async fn insert_check<'e, E>(
    executor: E,
    check: &NewLinkCheck,
    checked_at: DateTime<Utc>,
) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO link_checks (link_id, status_code, response_time_ms, is_available,
                                 content_type, final_url, redirect_count, failure_kind,
                                 error_message, check_method, checked_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&check.link_id)
    .bind(check.status_code)
    .bind(check.response_time_ms)
    .bind(check.is_available)
    .bind(&check.content_type)
    .bind(&check.final_url)
    .bind(check.redirect_count)
    .bind(&check.failure_kind)
    .bind(&check.error_message)
    .bind(&check.check_method)
    .bind(checked_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Most recent checks for a link, newest first.
pub async fn recent_checks<'e, E>(executor: E, link_id: &str, limit: i64) -> Result<Vec<LinkCheck>>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query_as::<_, LinkCheck>(
        r#"
        SELECT id, link_id, status_code, response_time_ms, is_available, content_type,
               final_url, redirect_count, failure_kind, error_message, check_method, checked_at
        FROM link_checks
        WHERE link_id = ?
        ORDER BY checked_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(link_id)
    .bind(limit)
    .fetch_all(executor)
    .await?;

    Ok(rows)
}

/// Number of checks and successful checks for a user's links made in
/// `[from, until)`.
pub async fn availability_between(
    pool: &SqlitePool,
    user_id: &str,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<(i64, i64)> {
    let row = sqlx::query_as::<_, (i64, i64)>(
        r#"
        SELECT COUNT(*), COALESCE(SUM(c.is_available), 0)
        FROM link_checks c
        INNER JOIN links l ON l.id = c.link_id
        WHERE l.user_id = ? AND c.checked_at >= ? AND c.checked_at < ?
        "#,
    )
    .bind(user_id)
    .bind(from)
    .bind(until)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Delete check history older than `before`.
pub async fn prune_before(pool: &SqlitePool, before: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM link_checks
        WHERE checked_at < ?
        "#,
    )
    .bind(before)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
