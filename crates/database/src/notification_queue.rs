//! Persistent queue of outbound notifications.
//!
//! Entries move `pending -> processing -> sent | failed`. The first step is a
//! compare-and-set ([`claim`]), so two dispatchers can never both deliver the
//! same entry. `processed_at` is stamped on every transition out of
//! `pending` and is never cleared.

use chrono::{DateTime, Utc};
use sqlx::{SqliteExecutor, SqlitePool};

use crate::error::{DatabaseError, Result};
use crate::models::{NotificationQueueEntry, NotificationType, QueueStatus};

const ENTRY_COLUMNS: &str = r#"
    id, user_id, notification_type, title, message, status, scheduled_for,
    processed_at, last_error, created_at
"#;

/// Add a pending notification.
pub async fn enqueue<'e, E>(
    executor: E,
    user_id: &str,
    notification_type: NotificationType,
    title: &str,
    message: &str,
    scheduled_for: DateTime<Utc>,
) -> Result<NotificationQueueEntry>
where
    E: SqliteExecutor<'e>,
{
    let entry = NotificationQueueEntry {
        id: crate::new_id(),
        user_id: user_id.to_string(),
        notification_type,
        title: title.to_string(),
        message: message.to_string(),
        status: QueueStatus::Pending,
        scheduled_for,
        processed_at: None,
        last_error: None,
        created_at: Utc::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO notification_queue
            (id, user_id, notification_type, title, message, status, scheduled_for, created_at)
        VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.user_id)
    .bind(entry.notification_type)
    .bind(&entry.title)
    .bind(&entry.message)
    .bind(entry.scheduled_for)
    .bind(entry.created_at)
    .execute(executor)
    .await?;

    Ok(entry)
}

/// Get a queue entry by ID.
pub async fn get_entry<'e, E>(executor: E, id: &str) -> Result<NotificationQueueEntry>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, NotificationQueueEntry>(&format!(
        "SELECT {} FROM notification_queue WHERE id = ?",
        ENTRY_COLUMNS
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| DatabaseError::not_found("NotificationQueueEntry", id))
}

/// List a user's queue entries in creation order.
pub async fn list_for_user<'e, E>(executor: E, user_id: &str) -> Result<Vec<NotificationQueueEntry>>
where
    E: SqliteExecutor<'e>,
{
    let entries = sqlx::query_as::<_, NotificationQueueEntry>(&format!(
        "SELECT {} FROM notification_queue WHERE user_id = ? ORDER BY rowid",
        ENTRY_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(executor)
    .await?;

    Ok(entries)
}

/// Pending entries due at `now`, oldest `scheduled_for` first, ties in creation order.
///
/// These are candidates only; each must still be [`claim`]ed before delivery.
pub async fn due_candidates<'e, E>(
    executor: E,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<NotificationQueueEntry>>
where
    E: SqliteExecutor<'e>,
{
    let entries = sqlx::query_as::<_, NotificationQueueEntry>(&format!(
        r#"
        SELECT {}
        FROM notification_queue
        WHERE status = 'pending' AND scheduled_for <= ?
        ORDER BY scheduled_for ASC, rowid ASC
        LIMIT ?
        "#,
        ENTRY_COLUMNS
    ))
    .bind(now)
    .bind(limit)
    .fetch_all(executor)
    .await?;

    Ok(entries)
}

/// Atomically move an entry from `pending` to `processing`.
///
/// Returns `false` when the entry was no longer pending (another dispatcher
/// won the race, or it was already processed).
pub async fn claim<'e, E>(executor: E, id: &str, now: DateTime<Utc>) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE notification_queue
        SET status = 'processing', processed_at = ?
        WHERE id = ? AND status = 'pending'
        "#,
    )
    .bind(now)
    .bind(id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Finish a claimed entry as delivered.
pub async fn mark_sent(pool: &SqlitePool, id: &str, now: DateTime<Utc>) -> Result<()> {
    finish(pool, id, QueueStatus::Sent, None, now).await
}

/// Finish a claimed entry as failed, keeping the error for operators.
pub async fn mark_failed(pool: &SqlitePool, id: &str, error: &str, now: DateTime<Utc>) -> Result<()> {
    finish(pool, id, QueueStatus::Failed, Some(error), now).await
}

async fn finish(
    pool: &SqlitePool,
    id: &str,
    status: QueueStatus,
    error: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE notification_queue
        SET status = ?, processed_at = ?, last_error = ?
        WHERE id = ? AND status = 'processing'
        "#,
    )
    .bind(status)
    .bind(now)
    .bind(error)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        let entry = get_entry(pool, id).await?;
        return Err(DatabaseError::InvalidState {
            entity: "NotificationQueueEntry",
            id: id.to_string(),
            state: entry.status.to_string(),
        });
    }

    Ok(())
}

/// Fail entries that have been `processing` since before `claimed_before`.
///
/// A dispatcher that died mid-delivery leaves its claims behind. They are
/// failed rather than returned to `pending`, since the message may already
/// have gone out.
pub async fn release_stale_claims(
    pool: &SqlitePool,
    claimed_before: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE notification_queue
        SET status = 'failed', processed_at = ?, last_error = 'claim expired before delivery finished'
        WHERE status = 'processing' AND processed_at < ?
        "#,
    )
    .bind(now)
    .bind(claimed_before)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Copy a failed entry into a fresh pending entry. The failed row is kept as-is.
pub async fn requeue(
    pool: &SqlitePool,
    id: &str,
    scheduled_for: DateTime<Utc>,
) -> Result<NotificationQueueEntry> {
    let failed = get_entry(pool, id).await?;
    if failed.status != QueueStatus::Failed {
        return Err(DatabaseError::InvalidState {
            entity: "NotificationQueueEntry",
            id: id.to_string(),
            state: failed.status.to_string(),
        });
    }

    enqueue(
        pool,
        &failed.user_id,
        failed.notification_type,
        &failed.title,
        &failed.message,
        scheduled_for,
    )
    .await
}

/// Count entries per status.
pub async fn count_by_status(pool: &SqlitePool) -> Result<Vec<(QueueStatus, i64)>> {
    let rows = sqlx::query_as::<_, (QueueStatus, i64)>(
        r#"
        SELECT status, COUNT(*) as count
        FROM notification_queue
        GROUP BY status
        ORDER BY status
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
