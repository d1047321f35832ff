//! Per-link notification cooldown.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use database::NotificationType;
use tracing::debug;

/// History older than this starts a fresh cooldown sequence.
const RESET_AFTER_HOURS: i64 = 24;

/// History older than this is dropped on cleanup.
const RETAIN_DAYS: i64 = 7;

/// Cleanup runs once the history grows past this many keys.
const CLEANUP_THRESHOLD: usize = 1000;

/// What a cooldown is tracked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThrottleKey {
    pub user_id: String,
    pub link_id: Option<String>,
    pub notification_type: NotificationType,
}

impl ThrottleKey {
    pub fn new(
        user_id: impl Into<String>,
        link_id: Option<&str>,
        notification_type: NotificationType,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            link_id: link_id.map(str::to_string),
            notification_type,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct History {
    last_sent: DateTime<Utc>,
    count: u32,
}

/// Suppresses repeated notifications for the same user, link and type.
///
/// The n-th notification inside a burst must wait `cooldown * 2^(n-1)` after
/// the previous one. A key that stayed quiet for 24 hours starts over. Only
/// queue entries are throttled; alert rows are always written.
#[derive(Debug)]
pub struct NotificationThrottler {
    cooldown: Duration,
    history: Mutex<HashMap<ThrottleKey, History>>,
}

impl NotificationThrottler {
    /// Create a throttler with the given base cooldown.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether a notification may go out now, recording it if so.
    pub fn should_send(&self, key: &ThrottleKey, now: DateTime<Utc>) -> bool {
        if !self.allows(key, now) {
            return false;
        }
        self.record(key, now);
        true
    }

    /// Whether a notification may go out now. Nothing is recorded.
    pub fn allows(&self, key: &ThrottleKey, now: DateTime<Utc>) -> bool {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = history.get(key) else {
            return true;
        };

        let elapsed = now - entry.last_sent;
        let exponent = entry.count.saturating_sub(1).min(16);
        let required = self
            .cooldown
            .checked_mul(2i32.pow(exponent))
            .unwrap_or(Duration::MAX);
        if elapsed < required {
            debug!(
                user_id = %key.user_id,
                link_id = ?key.link_id,
                notification_type = %key.notification_type,
                "Notification throttled"
            );
            return false;
        }
        true
    }

    /// Record a notification that went out at `now`.
    pub fn record(&self, key: &ThrottleKey, now: DateTime<Utc>) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());

        if history.len() > CLEANUP_THRESHOLD {
            retain_recent(&mut history, now);
        }

        let entry = history.entry(key.clone()).or_insert(History {
            last_sent: now,
            count: 0,
        });
        if now - entry.last_sent > Duration::hours(RESET_AFTER_HOURS) {
            entry.count = 0;
        }
        entry.last_sent = now;
        entry.count += 1;
    }

    /// Drop history entries older than the retention window.
    pub fn cleanup(&self, now: DateTime<Utc>) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        retain_recent(&mut history, now);
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn retain_recent(history: &mut HashMap<ThrottleKey, History>, now: DateTime<Utc>) {
    let cutoff = now - Duration::days(RETAIN_DAYS);
    history.retain(|_, h| h.last_sent > cutoff);
}
