//! Database models.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Health status of a tracked link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    /// Reachable, or not yet failing often enough to be considered broken.
    Active,
    /// Failing; the checker keeps probing it and restores it on success.
    Broken,
    /// Retired by the user. Terminal; never probed again.
    Removed,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Active => "active",
            LinkStatus::Broken => "broken",
            LinkStatus::Removed => "removed",
        }
    }

    /// Whether the health checker should probe links in this state.
    pub fn is_checkable(&self) -> bool {
        !matches!(self, LinkStatus::Removed)
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of in-app alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    BrokenLink,
    LinkRecovered,
    PriceChange,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::BrokenLink => "broken_link",
            AlertType::LinkRecovered => "link_recovered",
            AlertType::PriceChange => "price_change",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of outbound notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    BrokenLink,
    LinkRecovered,
    PriceChange,
    MonthlyReport,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::BrokenLink => "broken_link",
            NotificationType::LinkRecovered => "link_recovered",
            NotificationType::PriceChange => "price_change",
            NotificationType::MonthlyReport => "monthly_report",
        }
    }
}

impl From<AlertType> for NotificationType {
    fn from(alert_type: AlertType) -> Self {
        match alert_type {
            AlertType::BrokenLink => NotificationType::BrokenLink,
            AlertType::LinkRecovered => NotificationType::LinkRecovered,
            AlertType::PriceChange => NotificationType::PriceChange,
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a notification queue entry.
///
/// `Processing` is the in-flight marker a dispatcher sets when it claims an
/// entry; only the claimer may move it to `Sent` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Sent => "sent",
            QueueStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A LinkGuard account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    /// UUID v4
    pub id: String,
    /// Notification address
    pub email: String,
    /// Display name
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A tracked outbound URL owned by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Link {
    /// UUID v4
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Normalized http(s) URL.
    pub url: String,
    pub title: String,
    /// Logical placement (e.g. the page the link is published on).
    pub page: Option<String>,
    pub status: LinkStatus,
    /// When the last probe completed. Never moves backwards.
    pub last_checked: Option<DateTime<Utc>>,
    pub clicks: i64,
    pub revenue: f64,
    /// Last observed product price, if tracked.
    pub price: Option<f64>,
    /// HTTP status code of the last probe (None when no response was received).
    pub last_status: Option<i64>,
    /// Human-readable reason for the current status.
    pub status_reason: Option<String>,
    /// Failed probes since the last success.
    pub consecutive_failures: i64,
    /// Minimum minutes between automatic checks.
    pub check_frequency_minutes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Link {
    /// Whether an automatic check is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_checked {
            None => true,
            Some(last) => last + chrono::Duration::minutes(self.check_frequency_minutes) <= now,
        }
    }
}

/// Fields supplied when creating a link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewLink {
    pub user_id: String,
    pub url: String,
    pub title: String,
    pub page: Option<String>,
    pub price: Option<f64>,
    /// Defaults to 60 minutes when unset.
    pub check_frequency_minutes: Option<i64>,
}

/// Per-user toggles gating which events produce outbound notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AlertSettings {
    pub user_id: String,
    /// Master switch for all outbound notifications.
    pub email_enabled: bool,
    pub broken_links: bool,
    /// Recovery notifications (broken -> active).
    pub status_changes: bool,
    pub price_changes: bool,
    pub monthly_reports: bool,
    pub updated_at: DateTime<Utc>,
}

impl AlertSettings {
    /// Whether an event of this kind should be delivered outside the app.
    pub fn allows(&self, notification_type: NotificationType) -> bool {
        if !self.email_enabled {
            return false;
        }
        match notification_type {
            NotificationType::BrokenLink => self.broken_links,
            NotificationType::LinkRecovered => self.status_changes,
            NotificationType::PriceChange => self.price_changes,
            NotificationType::MonthlyReport => self.monthly_reports,
        }
    }
}

/// A persisted, notification-worthy event shown in-app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Alert {
    pub id: String,
    pub user_id: String,
    /// Cleared when the link is deleted.
    pub link_id: Option<String>,
    pub alert_type: AlertType,
    pub message: String,
    /// JSON-encoded context (status code, prices, ...).
    pub details: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// A pending or processed outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct NotificationQueueEntry {
    pub id: String,
    pub user_id: String,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub status: QueueStatus,
    pub scheduled_for: DateTime<Utc>,
    /// Set when the entry leaves `Pending`, null otherwise.
    pub processed_at: Option<DateTime<Utc>>,
    /// Delivery error for failed entries.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One completed probe of a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct LinkCheck {
    pub id: i64,
    pub link_id: String,
    pub status_code: Option<i64>,
    pub response_time_ms: i64,
    pub is_available: bool,
    pub content_type: Option<String>,
    pub final_url: Option<String>,
    pub redirect_count: i64,
    pub failure_kind: Option<String>,
    pub error_message: Option<String>,
    /// "HEAD" or "GET".
    pub check_method: String,
    pub checked_at: DateTime<Utc>,
}

/// Fields supplied when recording a probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewLinkCheck {
    pub link_id: String,
    pub status_code: Option<i64>,
    pub response_time_ms: i64,
    pub is_available: bool,
    pub content_type: Option<String>,
    pub final_url: Option<String>,
    pub redirect_count: i64,
    pub failure_kind: Option<String>,
    pub error_message: Option<String>,
    pub check_method: String,
}

/// A stored monthly summary for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MonthlyReport {
    pub id: String,
    pub user_id: String,
    /// Calendar month, "YYYY-MM".
    pub period: String,
    pub total_links: i64,
    pub healthy_links: i64,
    pub broken_links: i64,
    pub new_issues: i64,
    pub clicks: i64,
    pub revenue: f64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AlertSettings {
        AlertSettings {
            user_id: "u".to_string(),
            email_enabled: true,
            broken_links: true,
            status_changes: false,
            price_changes: true,
            monthly_reports: true,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_settings_allows_respects_toggles() {
        let s = settings();
        assert!(s.allows(NotificationType::BrokenLink));
        assert!(!s.allows(NotificationType::LinkRecovered));
        assert!(s.allows(NotificationType::MonthlyReport));
    }

    #[test]
    fn test_settings_master_switch() {
        let s = AlertSettings {
            email_enabled: false,
            ..settings()
        };
        assert!(!s.allows(NotificationType::BrokenLink));
        assert!(!s.allows(NotificationType::PriceChange));
    }

    #[test]
    fn test_removed_is_not_checkable() {
        assert!(LinkStatus::Active.is_checkable());
        assert!(LinkStatus::Broken.is_checkable());
        assert!(!LinkStatus::Removed.is_checkable());
    }
}
