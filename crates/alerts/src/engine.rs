//! Health and price event handling.

use chrono::{DateTime, Duration, Utc};
use database::{
    alert, alert_setting, link, notification_queue, Alert, AlertType, Database, Link, LinkStatus,
    NotificationQueueEntry, NotificationType,
};
use serde_json::json;
use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::error::Result;
use crate::throttle::{NotificationThrottler, ThrottleKey};

/// Default base cooldown between notifications for the same link (30 minutes).
const DEFAULT_COOLDOWN_MINUTES: i64 = 30;

/// Configuration for the alert engine.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Base cooldown between repeated notifications for one user, link and type.
    pub notification_cooldown: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            notification_cooldown: Duration::minutes(DEFAULT_COOLDOWN_MINUTES),
        }
    }
}

/// What the checker observed when a link changed state.
#[derive(Debug, Clone, Copy)]
pub struct HealthEvent<'a> {
    /// HTTP status of the probe, if a response arrived.
    pub status_code: Option<i64>,
    /// Short failure description, e.g. "HTTP 500" or "Connection timeout".
    pub reason: Option<&'a str>,
    pub checked_at: DateTime<Utc>,
}

/// A price alert and the notification queued for it, if any.
#[derive(Debug, Clone)]
pub struct PriceAlert {
    pub alert: Alert,
    pub notification: Option<NotificationQueueEntry>,
}

/// Records alerts and queues notifications for link events.
#[derive(Debug)]
pub struct AlertEngine {
    throttler: NotificationThrottler,
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new(AlertConfig::default())
    }
}

impl AlertEngine {
    /// Create an engine with the given configuration.
    pub fn new(config: AlertConfig) -> Self {
        Self {
            throttler: NotificationThrottler::new(config.notification_cooldown),
        }
    }

    /// Get a reference to the notification throttler.
    pub fn throttler(&self) -> &NotificationThrottler {
        &self.throttler
    }

    /// React to a link status transition.
    ///
    /// `active -> broken` records a `broken_link` alert and `broken -> active`
    /// a `link_recovered` alert. Any other pair is ignored. A notification is
    /// queued only when the owner's settings allow it. Transitions are never
    /// throttled: every one of them reaches the queue.
    pub async fn on_health_change(
        &self,
        conn: &mut SqliteConnection,
        link: &Link,
        old_status: LinkStatus,
        new_status: LinkStatus,
        event: &HealthEvent<'_>,
    ) -> Result<Option<Alert>> {
        let alert_type = match (old_status, new_status) {
            (LinkStatus::Active, LinkStatus::Broken) => AlertType::BrokenLink,
            (LinkStatus::Broken, LinkStatus::Active) => AlertType::LinkRecovered,
            _ => return Ok(None),
        };

        let (title, message) = match alert_type {
            AlertType::BrokenLink => (
                format!("Broken link: {}", link.title),
                broken_message(link, event),
            ),
            _ => (
                format!("Link recovered: {}", link.title),
                format!("Link is working again: {}", link.title),
            ),
        };

        let details = json!({
            "url": link.url,
            "previous_status": old_status,
            "status": new_status,
            "status_code": event.status_code,
            "reason": event.reason,
        });

        let alert = alert::insert_alert(
            &mut *conn,
            &link.user_id,
            Some(&link.id),
            alert_type,
            &message,
            Some(&details),
            event.checked_at,
        )
        .await?;

        info!(
            link_id = %link.id,
            user_id = %link.user_id,
            alert_type = %alert_type,
            "Recorded link alert"
        );

        let body = format!("{}\n\n{}", message, link.url);
        self.notify(
            conn,
            &link.user_id,
            Some(&link.id),
            alert_type.into(),
            &title,
            &body,
            event.checked_at,
            None,
        )
        .await?;

        Ok(Some(alert))
    }

    /// React to a newly observed price.
    ///
    /// Nothing happens when the price is unchanged or there was no previous
    /// price to compare against.
    ///
    /// Price notifications are throttled per link. The throttle is only
    /// consulted here; once the surrounding transaction commits, the caller
    /// records the send with [`AlertEngine::mark_price_notified`].
    /// [`AlertEngine::record_price`] does both.
    pub async fn on_price_change(
        &self,
        conn: &mut SqliteConnection,
        link: &Link,
        old_price: Option<f64>,
        new_price: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<PriceAlert>> {
        let Some(old_price) = old_price else {
            return Ok(None);
        };
        if (old_price - new_price).abs() < f64::EPSILON || link.status == LinkStatus::Removed {
            return Ok(None);
        }

        let direction = if new_price < old_price { "dropped" } else { "rose" };
        let message = match percent_change(old_price, new_price) {
            Some(pct) => format!(
                "Price {} for {}: {:.2} -> {:.2} ({:+.1}%)",
                direction, link.title, old_price, new_price, pct
            ),
            None => format!(
                "Price {} for {}: {:.2} -> {:.2}",
                direction, link.title, old_price, new_price
            ),
        };
        let details = json!({
            "url": link.url,
            "old_price": old_price,
            "new_price": new_price,
        });

        let alert = alert::insert_alert(
            &mut *conn,
            &link.user_id,
            Some(&link.id),
            AlertType::PriceChange,
            &message,
            Some(&details),
            now,
        )
        .await?;

        info!(link_id = %link.id, old_price, new_price, "Recorded price change");

        let title = format!("Price change: {}", link.title);
        let body = format!("{}\n\n{}", message, link.url);
        let key = price_key(link);
        let notification = self
            .notify(
                conn,
                &link.user_id,
                Some(&link.id),
                NotificationType::PriceChange,
                &title,
                &body,
                now,
                Some(&key),
            )
            .await?;

        Ok(Some(PriceAlert {
            alert,
            notification,
        }))
    }

    /// Start the price cooldown for a link after its notification was committed.
    pub fn mark_price_notified(&self, link: &Link, at: DateTime<Utc>) {
        self.throttler.record(&price_key(link), at);
    }

    /// Store a new price for a link and raise a price alert if it moved.
    pub async fn record_price(
        &self,
        db: &Database,
        link_id: &str,
        new_price: f64,
    ) -> Result<Option<Alert>> {
        let now = Utc::now();
        let mut tx = db.begin().await?;

        let previous = link::update_price(&mut *tx, link_id, new_price).await?;
        let current = link::get_link(&mut *tx, link_id).await?;
        let raised = self
            .on_price_change(&mut *tx, &current, previous, new_price, now)
            .await?;

        tx.commit().await?;

        Ok(raised.map(|raised| {
            if raised.notification.is_some() {
                self.mark_price_notified(&current, now);
            }
            raised.alert
        }))
    }

    /// Queue a notification if the user's settings allow it and, when a
    /// throttle key is given, the cooldown for that key has passed.
    pub(crate) async fn notify(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        link_id: Option<&str>,
        notification_type: NotificationType,
        title: &str,
        message: &str,
        now: DateTime<Utc>,
        throttle: Option<&ThrottleKey>,
    ) -> Result<Option<NotificationQueueEntry>> {
        let settings = alert_setting::get_settings(&mut *conn, user_id).await?;
        if !settings.allows(notification_type) {
            debug!(
                user_id,
                notification_type = %notification_type,
                "Notification disabled by user settings"
            );
            return Ok(None);
        }

        if let Some(key) = throttle {
            if !self.throttler.allows(key, now) {
                return Ok(None);
            }
        }

        let entry =
            notification_queue::enqueue(&mut *conn, user_id, notification_type, title, message, now)
                .await?;
        debug!(entry_id = %entry.id, user_id, link_id = ?link_id, "Queued notification");
        Ok(Some(entry))
    }
}

fn price_key(link: &Link) -> ThrottleKey {
    ThrottleKey::new(link.user_id.as_str(), Some(link.id.as_str()), NotificationType::PriceChange)
}

fn broken_message(link: &Link, event: &HealthEvent<'_>) -> String {
    match (event.status_code, event.reason) {
        (Some(code), _) => format!("Link is broken: {} (HTTP {})", link.title, code),
        (None, Some(reason)) => format!("Link is broken: {} ({})", link.title, reason),
        (None, None) => format!("Link is broken: {}", link.title),
    }
}

fn percent_change(old: f64, new: f64) -> Option<f64> {
    if old == 0.0 {
        return None;
    }
    Some((new - old) / old * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use database::{models::NewLink, user, QueueStatus};

    async fn setup() -> (Database, Link) {
        let db = Database::in_memory().await.unwrap();
        let u = user::create_user(db.pool(), "owner@example.com", None)
            .await
            .unwrap();
        let new_link = NewLink {
            user_id: u.id.clone(),
            url: "https://shop.example.com/p/42".to_string(),
            title: "Standing desk".to_string(),
            price: Some(199.0),
            ..Default::default()
        };
        let l = link::create_link(db.pool(), &new_link).await.unwrap();
        (db, l)
    }

    fn event(code: Option<i64>) -> HealthEvent<'static> {
        HealthEvent {
            status_code: code,
            reason: Some("HTTP 500"),
            checked_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_broken_transition_alerts_and_queues() {
        let (db, l) = setup().await;
        let engine = AlertEngine::default();
        let mut conn = db.pool().acquire().await.unwrap();

        let alert = engine
            .on_health_change(&mut conn, &l, LinkStatus::Active, LinkStatus::Broken, &event(Some(500)))
            .await
            .unwrap()
            .unwrap();
        drop(conn);

        assert_eq!(alert.alert_type, AlertType::BrokenLink);
        assert_eq!(alert.message, "Link is broken: Standing desk (HTTP 500)");
        assert_eq!(alert.link_id.as_deref(), Some(l.id.as_str()));

        let queued = notification_queue::list_for_user(db.pool(), &l.user_id).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].notification_type, NotificationType::BrokenLink);
        assert_eq!(queued[0].status, QueueStatus::Pending);
        assert_eq!(queued[0].processed_at, None);
    }

    #[tokio::test]
    async fn test_disabled_toggle_still_records_alert() {
        let (db, l) = setup().await;
        let mut settings = alert_setting::get_settings(db.pool(), &l.user_id).await.unwrap();
        settings.broken_links = false;
        alert_setting::update_settings(db.pool(), &settings).await.unwrap();

        let engine = AlertEngine::default();
        let mut conn = db.pool().acquire().await.unwrap();
        let alert = engine
            .on_health_change(&mut conn, &l, LinkStatus::Active, LinkStatus::Broken, &event(Some(500)))
            .await
            .unwrap();
        drop(conn);

        assert!(alert.is_some());
        assert_eq!(alert::count_unread(db.pool(), &l.user_id).await.unwrap(), 1);
        assert!(notification_queue::list_for_user(db.pool(), &l.user_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_non_transitions_ignored() {
        let (db, l) = setup().await;
        let engine = AlertEngine::default();
        let mut conn = db.pool().acquire().await.unwrap();

        for (old, new) in [
            (LinkStatus::Active, LinkStatus::Active),
            (LinkStatus::Broken, LinkStatus::Broken),
            (LinkStatus::Active, LinkStatus::Removed),
            (LinkStatus::Broken, LinkStatus::Removed),
        ] {
            let alert = engine
                .on_health_change(&mut conn, &l, old, new, &event(None))
                .await
                .unwrap();
            assert!(alert.is_none(), "{} -> {} should not alert", old, new);
        }
        drop(conn);

        assert_eq!(alert::count_unread(db.pool(), &l.user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recovery_gated_by_status_changes() {
        let (db, l) = setup().await;
        let mut settings = alert_setting::get_settings(db.pool(), &l.user_id).await.unwrap();
        settings.status_changes = false;
        alert_setting::update_settings(db.pool(), &settings).await.unwrap();

        let engine = AlertEngine::default();
        let mut conn = db.pool().acquire().await.unwrap();
        let alert = engine
            .on_health_change(&mut conn, &l, LinkStatus::Broken, LinkStatus::Active, &event(Some(200)))
            .await
            .unwrap()
            .unwrap();
        drop(conn);

        assert_eq!(alert.alert_type, AlertType::LinkRecovered);
        assert!(notification_queue::list_for_user(db.pool(), &l.user_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_flapping_link_notifies_every_transition() {
        let (db, l) = setup().await;
        let engine = AlertEngine::default();
        let mut conn = db.pool().acquire().await.unwrap();

        for (old, new) in [
            (LinkStatus::Active, LinkStatus::Broken),
            (LinkStatus::Broken, LinkStatus::Active),
            (LinkStatus::Active, LinkStatus::Broken),
        ] {
            engine
                .on_health_change(&mut conn, &l, old, new, &event(Some(404)))
                .await
                .unwrap();
        }
        drop(conn);

        let queued = notification_queue::list_for_user(db.pool(), &l.user_id).await.unwrap();
        let broken = queued
            .iter()
            .filter(|e| e.notification_type == NotificationType::BrokenLink)
            .count();
        assert_eq!(broken, 2);
        assert_eq!(queued.len(), 3);
        assert!(engine.throttler().is_empty());
    }

    #[tokio::test]
    async fn test_price_cooldown_suppresses_queue_not_alert() {
        let (db, l) = setup().await;
        let engine = AlertEngine::default();

        engine.record_price(&db, &l.id, 149.0).await.unwrap().unwrap();
        engine.record_price(&db, &l.id, 129.0).await.unwrap().unwrap();

        let alerts = alert::list_alerts_for_link(db.pool(), &l.id).await.unwrap();
        assert_eq!(alerts.len(), 2);
        let queued = notification_queue::list_for_user(db.pool(), &l.user_id).await.unwrap();
        assert_eq!(queued.len(), 1);
    }

    #[tokio::test]
    async fn test_rolled_back_price_change_keeps_cooldown_clear() {
        let (db, l) = setup().await;
        let engine = AlertEngine::default();

        {
            let mut tx = db.begin().await.unwrap();
            let raised = engine
                .on_price_change(&mut *tx, &l, Some(199.0), 149.0, Utc::now())
                .await
                .unwrap()
                .unwrap();
            assert!(raised.notification.is_some());
            // dropped without commit
        }
        assert!(engine.throttler().is_empty());

        engine.record_price(&db, &l.id, 149.0).await.unwrap().unwrap();
        let queued = notification_queue::list_for_user(db.pool(), &l.user_id).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].notification_type, NotificationType::PriceChange);
    }

    #[tokio::test]
    async fn test_record_price() {
        let (db, l) = setup().await;
        let engine = AlertEngine::default();

        let same = engine.record_price(&db, &l.id, 199.0).await.unwrap();
        assert!(same.is_none());

        let alert = engine.record_price(&db, &l.id, 149.0).await.unwrap().unwrap();
        assert_eq!(alert.alert_type, AlertType::PriceChange);
        assert!(alert.message.starts_with("Price dropped for Standing desk"));
        assert!(alert.message.contains("-25.1%"));

        let stored = link::get_link(db.pool(), &l.id).await.unwrap();
        assert_eq!(stored.price, Some(149.0));

        let queued = notification_queue::list_for_user(db.pool(), &l.user_id).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].notification_type, NotificationType::PriceChange);
    }

    #[tokio::test]
    async fn test_first_price_sets_baseline() {
        let (db, l) = setup().await;
        let unpriced = link::create_link(
            db.pool(),
            &NewLink {
                user_id: l.user_id.clone(),
                url: "https://shop.example.com/p/43".to_string(),
                title: "Monitor arm".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let engine = AlertEngine::default();
        assert!(engine.record_price(&db, &unpriced.id, 89.0).await.unwrap().is_none());
        assert_eq!(alert::count_unread(db.pool(), &l.user_id).await.unwrap(), 0);
    }

    #[test]
    fn test_percent_change() {
        assert_eq!(percent_change(0.0, 10.0), None);
        assert_eq!(percent_change(100.0, 150.0), Some(50.0));
    }
}
