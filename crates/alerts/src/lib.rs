//! Alert engine for LinkGuard.
//!
//! Link health transitions and price changes always produce an in-app
//! [`Alert`](database::Alert). Whether they also produce an outbound
//! notification is decided separately, by the owner's alert settings and,
//! for price changes, the [`NotificationThrottler`]. The engine never
//! delivers anything itself; it only writes queue entries for the dispatcher.
//!
//! All engine calls take a connection so the caller can run them inside the
//! same transaction as the status or price write that triggered them.

mod engine;
mod error;
mod report;
mod throttle;

pub use engine::{AlertConfig, AlertEngine, HealthEvent, PriceAlert};
pub use error::{AlertError, Result};
pub use report::{ReportPeriod, ReportRun};
pub use throttle::{NotificationThrottler, ThrottleKey};
