//! In-app alerts.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use crate::error::{DatabaseError, Result};
use crate::models::{Alert, AlertType};

/// Insert an alert. Alerts are immutable apart from their read flag.
pub async fn insert_alert<'e, E>(
    executor: E,
    user_id: &str,
    link_id: Option<&str>,
    alert_type: AlertType,
    message: &str,
    details: Option<&serde_json::Value>,
    created_at: DateTime<Utc>,
) -> Result<Alert>
where
    E: SqliteExecutor<'e>,
{
    let alert = Alert {
        id: crate::new_id(),
        user_id: user_id.to_string(),
        link_id: link_id.map(str::to_string),
        alert_type,
        message: message.to_string(),
        details: details.map(|d| d.to_string()),
        is_read: false,
        created_at,
    };

    sqlx::query(
        r#"
        INSERT INTO alerts (id, user_id, link_id, alert_type, message, details, is_read, created_at)
        VALUES (?, ?, ?, ?, ?, ?, 0, ?)
        "#,
    )
    .bind(&alert.id)
    .bind(&alert.user_id)
    .bind(&alert.link_id)
    .bind(alert.alert_type)
    .bind(&alert.message)
    .bind(&alert.details)
    .bind(alert.created_at)
    .execute(executor)
    .await?;

    Ok(alert)
}

/// List a user's alerts, newest first.
pub async fn list_alerts<'e, E>(
    executor: E,
    user_id: &str,
    unread_only: bool,
    limit: i64,
) -> Result<Vec<Alert>>
where
    E: SqliteExecutor<'e>,
{
    let alerts = sqlx::query_as::<_, Alert>(
        r#"
        SELECT id, user_id, link_id, alert_type, message, details, is_read, created_at
        FROM alerts
        WHERE user_id = ? AND (? = 0 OR is_read = 0)
        ORDER BY created_at DESC
        LIMIT ?
        "#,
    )
    .bind(user_id)
    .bind(unread_only)
    .bind(limit)
    .fetch_all(executor)
    .await?;

    Ok(alerts)
}

/// List all alerts attached to a link, oldest first.
pub async fn list_alerts_for_link<'e, E>(executor: E, link_id: &str) -> Result<Vec<Alert>>
where
    E: SqliteExecutor<'e>,
{
    let alerts = sqlx::query_as::<_, Alert>(
        r#"
        SELECT id, user_id, link_id, alert_type, message, details, is_read, created_at
        FROM alerts
        WHERE link_id = ?
        ORDER BY created_at ASC
        "#,
    )
    .bind(link_id)
    .fetch_all(executor)
    .await?;

    Ok(alerts)
}

/// Count alerts of one type a user received since `since`.
pub async fn count_since<'e, E>(
    executor: E,
    user_id: &str,
    alert_type: AlertType,
    since: DateTime<Utc>,
) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM alerts
        WHERE user_id = ? AND alert_type = ? AND created_at >= ?
        "#,
    )
    .bind(user_id)
    .bind(alert_type)
    .bind(since)
    .fetch_one(executor)
    .await?;

    Ok(count)
}

/// Count a user's unread alerts.
pub async fn count_unread<'e, E>(executor: E, user_id: &str) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM alerts WHERE user_id = ? AND is_read = 0
        "#,
    )
    .bind(user_id)
    .fetch_one(executor)
    .await?;

    Ok(count)
}

/// Mark an alert as read.
pub async fn mark_read<'e, E>(executor: E, alert_id: &str) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE alerts SET is_read = 1 WHERE id = ?
        "#,
    )
    .bind(alert_id)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::not_found("Alert", alert_id));
    }

    Ok(())
}
