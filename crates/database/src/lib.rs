//! SQLite persistence layer for LinkGuard.
//!
//! This crate owns the LinkGuard schema (users, links, alerts, alert
//! settings, the notification queue, check history and monthly reports) and
//! exposes one module of async operations per table, using SQLx with SQLite.
//!
//! Every update sets `updated_at` itself; the schema has no triggers.
//!
//! # Example
//!
//! ```no_run
//! use database::{Database, models::NewLink, link, user};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Connect and run migrations
//!     let db = Database::connect("sqlite:linkguard.db?mode=rwc").await?;
//!     db.migrate().await?;
//!
//!     // Sign up a user (alert settings are created with defaults)
//!     let alice = user::create_user(db.pool(), "alice@example.com", Some("Alice")).await?;
//!
//!     // Track a link
//!     let new_link = NewLink {
//!         user_id: alice.id.clone(),
//!         url: "example.com/deal".to_string(),
//!         title: "Deal of the day".to_string(),
//!         ..Default::default()
//!     };
//!     link::create_link(db.pool(), &new_link).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod alert;
pub mod alert_setting;
pub mod error;
pub mod link;
pub mod link_check;
pub mod models;
pub mod monthly_report;
pub mod notification_queue;
pub mod user;
pub mod validation;

pub use error::{DatabaseError, Result};
pub use models::{
    Alert, AlertSettings, AlertType, Link, LinkCheck, LinkStatus, MonthlyReport, NewLink,
    NewLinkCheck, NotificationQueueEntry, NotificationType, QueueStatus, User,
};
pub use validation::ValidationError;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::time::Duration;

/// Generate a new primary key.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Database connection wrapper.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Default pool size for database connections.
    /// Sized for a checker pass persisting results from parallel probes.
    const DEFAULT_POOL_SIZE: u32 = 10;

    /// Connect to a SQLite database.
    ///
    /// The URL should be in the format `sqlite:path/to/db.sqlite?mode=rwc`.
    /// Use `?mode=rwc` to create the database file if it doesn't exist.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn example() -> database::Result<()> {
    /// let db = database::Database::connect("sqlite:data/linkguard.db?mode=rwc").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_pool_size(url, Self::DEFAULT_POOL_SIZE).await
    }

    /// Connect to a SQLite database with a custom pool size.
    pub async fn connect_with_pool_size(url: &str, pool_size: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        tracing::info!(
            "Connected to database: {} (pool size: {})",
            url,
            pool_size
        );

        Ok(Self { pool })
    }

    /// Open a private in-memory database with migrations applied.
    ///
    /// Every SQLite in-memory connection is its own database, so the pool is
    /// pinned to a single connection that is never recycled.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Run database migrations.
    ///
    /// This should be called once after connecting to ensure the schema is up to date.
    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("Running database migrations...");

        sqlx::migrate!("./migrations").run(&self.pool).await?;

        tracing::info!("Migrations complete");
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a write transaction. Dropping it without commit rolls back.
    ///
    /// The transaction takes SQLite's write lock up front (`BEGIN IMMEDIATE`),
    /// so concurrent writers queue on the busy timeout instead of failing
    /// when a read lock cannot be upgraded.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
