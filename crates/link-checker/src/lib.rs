//! Link health checker for LinkGuard.
//!
//! A [`HealthChecker`] walks the links that are due for a check, probes them
//! in parallel through a [`Probe`] implementation and persists each result in
//! its own transaction: the status write, a check-history row and any alert
//! the transition triggers either all land or none do.
//!
//! Status follows a small state machine (see [`next_state`]):
//!
//! - `active` becomes `broken` after `failure_threshold` consecutive failures,
//!   or immediately on a fatal failure (invalid URL, HTTP 404 or 410)
//! - `broken` becomes `active` on the first successful probe
//! - `removed` is terminal and never probed
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use alerts::AlertEngine;
//! use database::Database;
//! use link_checker::{CheckerConfig, HealthChecker, HttpProber, ProbeConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::connect("sqlite:linkguard.db?mode=rwc").await?;
//! let prober = HttpProber::new(ProbeConfig::default())?;
//! let checker = HealthChecker::new(
//!     db,
//!     prober,
//!     Arc::new(AlertEngine::default()),
//!     CheckerConfig::default(),
//! );
//!
//! let report = checker.run_pass(None).await?;
//! println!("checked {} links", report.checked);
//! # Ok(())
//! # }
//! ```

mod checker;
mod error;
mod http;
mod probe;
mod schedule;
mod state;

pub use checker::{CheckRecord, CheckerConfig, CheckerStats, HealthChecker, PassReport};
pub use error::{CheckerError, Result};
pub use http::{HttpProber, ProbeConfig};
pub use probe::{FailureKind, Probe, ProbeMethod, ProbeOutcome};
pub use state::{next_state, Transition};
