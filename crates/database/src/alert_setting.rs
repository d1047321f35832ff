//! Per-user alert settings.

use chrono::Utc;
use sqlx::SqliteExecutor;

use crate::error::{DatabaseError, Result};
use crate::models::AlertSettings;

/// Get the alert settings for a user.
pub async fn get_settings<'e, E>(executor: E, user_id: &str) -> Result<AlertSettings>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, AlertSettings>(
        r#"
        SELECT user_id, email_enabled, broken_links, status_changes,
               price_changes, monthly_reports, updated_at
        FROM alert_settings
        WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| DatabaseError::not_found("AlertSettings", user_id))
}

/// Replace a user's toggles. `updated_at` is refreshed; the passed value is ignored.
pub async fn update_settings<'e, E>(executor: E, settings: &AlertSettings) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE alert_settings
        SET email_enabled = ?, broken_links = ?, status_changes = ?,
            price_changes = ?, monthly_reports = ?, updated_at = ?
        WHERE user_id = ?
        "#,
    )
    .bind(settings.email_enabled)
    .bind(settings.broken_links)
    .bind(settings.status_changes)
    .bind(settings.price_changes)
    .bind(settings.monthly_reports)
    .bind(Utc::now())
    .bind(&settings.user_id)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::not_found("AlertSettings", &settings.user_id));
    }

    Ok(())
}
