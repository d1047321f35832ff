//! Link registry: tracked links and their health status.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};

use crate::error::{DatabaseError, Result};
use crate::models::{Link, LinkStatus, NewLink};
use crate::validation::{normalize_url, validate_price, validate_title, ValidationError};

const DEFAULT_CHECK_FREQUENCY_MINUTES: i64 = 60;

const LINK_COLUMNS: &str = r#"
    id, user_id, url, title, page, status, last_checked, clicks, revenue, price,
    last_status, status_reason, consecutive_failures, check_frequency_minutes,
    created_at, updated_at
"#;

/// User-editable link fields. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkUpdate {
    pub url: Option<String>,
    pub title: Option<String>,
    /// `Some(None)` clears the page.
    pub page: Option<Option<String>>,
    pub check_frequency_minutes: Option<i64>,
}

/// Create a new link. The URL is sanitized and normalized first.
pub async fn create_link(pool: &SqlitePool, new_link: &NewLink) -> Result<Link> {
    let url = normalize_url(&new_link.url)?;
    validate_title(&new_link.title)?;
    if let Some(price) = new_link.price {
        validate_price(price)?;
    }
    let check_frequency_minutes = new_link
        .check_frequency_minutes
        .unwrap_or(DEFAULT_CHECK_FREQUENCY_MINUTES);
    validate_frequency(check_frequency_minutes)?;

    let now = Utc::now();
    let link = Link {
        id: crate::new_id(),
        user_id: new_link.user_id.clone(),
        url,
        title: new_link.title.trim().to_string(),
        page: new_link.page.clone(),
        status: LinkStatus::Active,
        last_checked: None,
        clicks: 0,
        revenue: 0.0,
        price: new_link.price,
        last_status: None,
        status_reason: None,
        consecutive_failures: 0,
        check_frequency_minutes,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO links (id, user_id, url, title, page, status, price,
                           check_frequency_minutes, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&link.id)
    .bind(&link.user_id)
    .bind(&link.url)
    .bind(&link.title)
    .bind(&link.page)
    .bind(link.status)
    .bind(link.price)
    .bind(link.check_frequency_minutes)
    .bind(link.created_at)
    .bind(link.updated_at)
    .execute(pool)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.is_foreign_key_violation() {
                return DatabaseError::not_found("User", &new_link.user_id);
            }
        }
        DatabaseError::Sqlx(e)
    })?;

    tracing::debug!(link_id = %link.id, user_id = %link.user_id, "Created link");
    Ok(link)
}

/// Get a link by ID.
pub async fn get_link<'e, E>(executor: E, id: &str) -> Result<Link>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, Link>(&format!("SELECT {} FROM links WHERE id = ?", LINK_COLUMNS))
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| DatabaseError::not_found("Link", id))
}

/// List a user's links, newest first.
pub async fn list_links_for_user<'e, E>(executor: E, user_id: &str) -> Result<Vec<Link>>
where
    E: SqliteExecutor<'e>,
{
    let links = sqlx::query_as::<_, Link>(&format!(
        "SELECT {} FROM links WHERE user_id = ? ORDER BY created_at DESC",
        LINK_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(executor)
    .await?;

    Ok(links)
}

/// All links the health checker is responsible for (`active` or `broken`).
///
/// Failing links come first, then the ones checked longest ago.
pub async fn get_active_links<'e, E>(executor: E) -> Result<Vec<Link>>
where
    E: SqliteExecutor<'e>,
{
    let links = sqlx::query_as::<_, Link>(&format!(
        r#"
        SELECT {}
        FROM links
        WHERE status IN ('active', 'broken')
        ORDER BY consecutive_failures DESC, last_checked ASC
        "#,
        LINK_COLUMNS
    ))
    .fetch_all(executor)
    .await?;

    Ok(links)
}

/// Set a link's health status after a check.
///
/// Refreshes `last_checked` (never moving it backwards), `last_status`,
/// `status_reason` and `updated_at`. Removed links are terminal and are
/// rejected with [`DatabaseError::InvalidState`].
pub async fn update_status(
    conn: &mut SqliteConnection,
    link_id: &str,
    status: LinkStatus,
    http_code: Option<i64>,
    reason: Option<&str>,
    checked_at: DateTime<Utc>,
) -> Result<()> {
    write_status(conn, link_id, status, http_code, reason, None, checked_at).await
}

/// [`update_status`] plus the consecutive-failure counter, as written by the checker.
pub async fn record_check_result(
    conn: &mut SqliteConnection,
    link_id: &str,
    status: LinkStatus,
    http_code: Option<i64>,
    reason: Option<&str>,
    consecutive_failures: i64,
    checked_at: DateTime<Utc>,
) -> Result<()> {
    write_status(
        conn,
        link_id,
        status,
        http_code,
        reason,
        Some(consecutive_failures),
        checked_at,
    )
    .await
}

async fn write_status(
    conn: &mut SqliteConnection,
    link_id: &str,
    status: LinkStatus,
    http_code: Option<i64>,
    reason: Option<&str>,
    consecutive_failures: Option<i64>,
    checked_at: DateTime<Utc>,
) -> Result<()> {
    ensure_not_removed(&mut *conn, link_id).await?;

    sqlx::query(
        r#"
        UPDATE links
        SET status = ?1,
            last_status = ?2,
            status_reason = ?3,
            consecutive_failures = COALESCE(?4, consecutive_failures),
            last_checked = CASE
                WHEN last_checked IS NULL OR last_checked < ?5 THEN ?5
                ELSE last_checked
            END,
            updated_at = ?6
        WHERE id = ?7 AND status != 'removed'
        "#,
    )
    .bind(status)
    .bind(http_code)
    .bind(reason)
    .bind(consecutive_failures)
    .bind(checked_at)
    .bind(Utc::now())
    .bind(link_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Fail with `NotFound` for unknown links and `InvalidState` for removed ones.
async fn ensure_not_removed(conn: &mut SqliteConnection, link_id: &str) -> Result<()> {
    let status = sqlx::query_scalar::<_, LinkStatus>("SELECT status FROM links WHERE id = ?")
        .bind(link_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DatabaseError::not_found("Link", link_id))?;

    if status == LinkStatus::Removed {
        return Err(DatabaseError::InvalidState {
            entity: "Link",
            id: link_id.to_string(),
            state: status.to_string(),
        });
    }

    Ok(())
}

/// Apply a user edit. Changing the URL resets the failure counter.
pub async fn update_link_details(
    pool: &SqlitePool,
    link_id: &str,
    update: &LinkUpdate,
) -> Result<Link> {
    let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;
    ensure_not_removed(&mut *tx, link_id).await?;
    let current = get_link(&mut *tx, link_id).await?;

    let url = match &update.url {
        Some(raw) => normalize_url(raw)?,
        None => current.url.clone(),
    };
    let title = match &update.title {
        Some(title) => {
            validate_title(title)?;
            title.trim().to_string()
        }
        None => current.title.clone(),
    };
    let page = match &update.page {
        Some(page) => page.clone(),
        None => current.page.clone(),
    };
    let check_frequency_minutes = match update.check_frequency_minutes {
        Some(minutes) => {
            validate_frequency(minutes)?;
            minutes
        }
        None => current.check_frequency_minutes,
    };
    let consecutive_failures = if url != current.url {
        0
    } else {
        current.consecutive_failures
    };

    sqlx::query(
        r#"
        UPDATE links
        SET url = ?, title = ?, page = ?, check_frequency_minutes = ?,
            consecutive_failures = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&url)
    .bind(&title)
    .bind(&page)
    .bind(check_frequency_minutes)
    .bind(consecutive_failures)
    .bind(Utc::now())
    .bind(link_id)
    .execute(&mut *tx)
    .await?;

    let updated = get_link(&mut *tx, link_id).await?;
    tx.commit().await?;

    Ok(updated)
}

/// Retire a link. Removed is terminal: the checker never touches it again.
pub async fn mark_removed(pool: &SqlitePool, link_id: &str) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE links
        SET status = 'removed', updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(Utc::now())
    .bind(link_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::not_found("Link", link_id));
    }

    Ok(())
}

/// Delete a link. Alerts that referenced it keep existing with no link.
pub async fn delete_link(pool: &SqlitePool, link_id: &str) -> Result<()> {
    let result = sqlx::query(
        r#"
        DELETE FROM links
        WHERE id = ?
        "#,
    )
    .bind(link_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::not_found("Link", link_id));
    }

    Ok(())
}

/// Count a click and the revenue it earned.
pub async fn record_click(pool: &SqlitePool, link_id: &str, revenue: f64) -> Result<()> {
    if !revenue.is_finite() || revenue < 0.0 {
        return Err(ValidationError::OutOfRange {
            field: "revenue".to_string(),
            value: revenue.to_string(),
        }
        .into());
    }

    let result = sqlx::query(
        r#"
        UPDATE links
        SET clicks = clicks + 1, revenue = revenue + ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(revenue)
    .bind(Utc::now())
    .bind(link_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::not_found("Link", link_id));
    }

    Ok(())
}

/// Store a newly observed price and return the previous one.
pub async fn update_price(
    conn: &mut SqliteConnection,
    link_id: &str,
    price: f64,
) -> Result<Option<f64>> {
    validate_price(price)?;

    let previous = sqlx::query_scalar::<_, Option<f64>>("SELECT price FROM links WHERE id = ?")
        .bind(link_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DatabaseError::not_found("Link", link_id))?;

    sqlx::query(
        r#"
        UPDATE links
        SET price = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(price)
    .bind(Utc::now())
    .bind(link_id)
    .execute(&mut *conn)
    .await?;

    Ok(previous)
}

fn validate_frequency(minutes: i64) -> std::result::Result<(), ValidationError> {
    if !(1..=60 * 24 * 30).contains(&minutes) {
        return Err(ValidationError::OutOfRange {
            field: "check_frequency_minutes".to_string(),
            value: minutes.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{user, Database};
    use chrono::Duration;

    async fn setup() -> (Database, String) {
        let db = Database::in_memory().await.unwrap();
        let u = user::create_user(db.pool(), "links@example.com", None)
            .await
            .unwrap();
        (db, u.id)
    }

    fn new_link(user_id: &str, url: &str) -> NewLink {
        NewLink {
            user_id: user_id.to_string(),
            url: url.to_string(),
            title: "Affiliate link".to_string(),
            page: Some("/reviews/best-blenders".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_normalizes_url() {
        let (db, user_id) = setup().await;
        let link = create_link(db.pool(), &new_link(&user_id, "shop.example.com/p/1"))
            .await
            .unwrap();
        assert_eq!(link.url, "https://shop.example.com/p/1");
        assert_eq!(link.status, LinkStatus::Active);
        assert_eq!(link.check_frequency_minutes, 60);

        let fetched = get_link(db.pool(), &link.id).await.unwrap();
        assert_eq!(fetched.url, link.url);
        assert_eq!(fetched.page.as_deref(), Some("/reviews/best-blenders"));
    }

    #[tokio::test]
    async fn test_create_for_unknown_user() {
        let (db, _) = setup().await;
        let result = create_link(db.pool(), &new_link("nobody", "https://example.com")).await;
        assert!(matches!(
            result,
            Err(DatabaseError::NotFound { entity: "User", .. })
        ));
    }

    #[tokio::test]
    async fn test_update_status_unknown_link() {
        let (db, _) = setup().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let result = update_status(
            &mut conn,
            "missing",
            LinkStatus::Broken,
            Some(500),
            None,
            Utc::now(),
        )
        .await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_update_status_sets_fields() {
        let (db, user_id) = setup().await;
        let link = create_link(db.pool(), &new_link(&user_id, "https://example.com/a"))
            .await
            .unwrap();
        let checked_at = Utc::now();

        let mut conn = db.pool().acquire().await.unwrap();
        record_check_result(
            &mut conn,
            &link.id,
            LinkStatus::Broken,
            Some(503),
            Some("HTTP 503"),
            3,
            checked_at,
        )
        .await
        .unwrap();
        drop(conn);

        let fetched = get_link(db.pool(), &link.id).await.unwrap();
        assert_eq!(fetched.status, LinkStatus::Broken);
        assert_eq!(fetched.last_status, Some(503));
        assert_eq!(fetched.status_reason.as_deref(), Some("HTTP 503"));
        assert_eq!(fetched.consecutive_failures, 3);
        assert_eq!(fetched.last_checked, Some(checked_at));
        assert!(fetched.updated_at >= link.updated_at);
    }

    #[tokio::test]
    async fn test_last_checked_never_moves_backwards() {
        let (db, user_id) = setup().await;
        let link = create_link(db.pool(), &new_link(&user_id, "https://example.com/b"))
            .await
            .unwrap();
        let later = Utc::now();
        let earlier = later - Duration::minutes(5);

        let mut conn = db.pool().acquire().await.unwrap();
        update_status(&mut conn, &link.id, LinkStatus::Active, Some(200), None, later)
            .await
            .unwrap();
        update_status(&mut conn, &link.id, LinkStatus::Active, Some(200), None, earlier)
            .await
            .unwrap();
        drop(conn);

        let fetched = get_link(db.pool(), &link.id).await.unwrap();
        assert_eq!(fetched.last_checked, Some(later));
    }

    #[tokio::test]
    async fn test_removed_is_terminal() {
        let (db, user_id) = setup().await;
        let link = create_link(db.pool(), &new_link(&user_id, "https://example.com/c"))
            .await
            .unwrap();
        mark_removed(db.pool(), &link.id).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let result = update_status(
            &mut conn,
            &link.id,
            LinkStatus::Active,
            Some(200),
            None,
            Utc::now(),
        )
        .await;
        drop(conn);
        assert!(matches!(result, Err(DatabaseError::InvalidState { .. })));

        let fetched = get_link(db.pool(), &link.id).await.unwrap();
        assert_eq!(fetched.status, LinkStatus::Removed);
        assert_eq!(fetched.last_checked, None);

        let active = get_active_links(db.pool()).await.unwrap();
        assert!(active.iter().all(|l| l.id != link.id));
    }

    #[tokio::test]
    async fn test_get_active_links_orders_failing_first() {
        let (db, user_id) = setup().await;
        let healthy = create_link(db.pool(), &new_link(&user_id, "https://example.com/ok"))
            .await
            .unwrap();
        let failing = create_link(db.pool(), &new_link(&user_id, "https://example.com/bad"))
            .await
            .unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        record_check_result(
            &mut conn,
            &failing.id,
            LinkStatus::Active,
            Some(500),
            Some("HTTP 500"),
            2,
            Utc::now(),
        )
        .await
        .unwrap();
        drop(conn);

        let links = get_active_links(db.pool()).await.unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].id, failing.id);
        assert_eq!(links[1].id, healthy.id);
    }

    #[tokio::test]
    async fn test_update_details_resets_failures_on_new_url() {
        let (db, user_id) = setup().await;
        let link = create_link(db.pool(), &new_link(&user_id, "https://example.com/old"))
            .await
            .unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        record_check_result(
            &mut conn,
            &link.id,
            LinkStatus::Active,
            Some(500),
            None,
            2,
            Utc::now(),
        )
        .await
        .unwrap();
        drop(conn);

        let update = LinkUpdate {
            url: Some("example.com/new".to_string()),
            title: Some("Renamed".to_string()),
            page: Some(None),
            ..Default::default()
        };
        let updated = update_link_details(db.pool(), &link.id, &update).await.unwrap();
        assert_eq!(updated.url, "https://example.com/new");
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.page, None);
        assert_eq!(updated.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_record_click_and_price() {
        let (db, user_id) = setup().await;
        let mut input = new_link(&user_id, "https://example.com/p");
        input.price = Some(10.0);
        let link = create_link(db.pool(), &input).await.unwrap();

        record_click(db.pool(), &link.id, 1.25).await.unwrap();
        record_click(db.pool(), &link.id, 0.75).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let previous = update_price(&mut conn, &link.id, 12.5).await.unwrap();
        drop(conn);
        assert_eq!(previous, Some(10.0));

        let fetched = get_link(db.pool(), &link.id).await.unwrap();
        assert_eq!(fetched.clicks, 2);
        assert!((fetched.revenue - 2.0).abs() < f64::EPSILON);
        assert_eq!(fetched.price, Some(12.5));
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let mut link = Link {
            id: "l".to_string(),
            user_id: "u".to_string(),
            url: "https://example.com".to_string(),
            title: "t".to_string(),
            page: None,
            status: LinkStatus::Active,
            last_checked: None,
            clicks: 0,
            revenue: 0.0,
            price: None,
            last_status: None,
            status_reason: None,
            consecutive_failures: 0,
            check_frequency_minutes: 60,
            created_at: now,
            updated_at: now,
        };
        assert!(link.is_due(now));
        link.last_checked = Some(now - Duration::minutes(30));
        assert!(!link.is_due(now));
        link.last_checked = Some(now - Duration::minutes(60));
        assert!(link.is_due(now));
    }
}
