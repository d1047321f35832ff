//! LinkGuard service and operator CLI.
//!
//! `linkguard run` starts the health checker, the notification dispatcher and
//! the monthly report scheduler and keeps them running until Ctrl+C. The
//! other subcommands run a single step and exit.

mod config;

use std::future::Future;
use std::sync::Arc;

use alerts::{AlertEngine, ReportPeriod};
use chrono::Utc;
use clap::{Parser, Subcommand};
use database::Database;
use dispatcher::{Dispatcher, EmailChannel, LoggingChannel, NotificationChannel};
use link_checker::{HealthChecker, HttpProber};
use mailer::{Mailer, MailerConfig, MailerError};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "linkguard")]
#[command(about = "Monitor affiliate links and notify their owners")]
struct Args {
    /// SQLite database URL. Falls back to DATABASE_URL env.
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run checker, dispatcher and report scheduler until Ctrl+C
    Run,

    /// Run one check pass over all due links
    Check {
        /// Probes running at once
        #[arg(long)]
        max_concurrent: Option<usize>,
    },

    /// Check a single link now
    CheckLink {
        /// Link ID
        link_id: String,
    },

    /// Deliver due notifications once
    Dispatch {
        /// Entries to deliver at most
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Generate monthly reports
    MonthlyReport {
        /// Month to report on, as YYYY-MM (default: last month)
        #[arg(long)]
        period: Option<String>,
    },

    /// Queue a failed notification again
    Requeue {
        /// Failed queue entry ID
        entry_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,linkguard=info,link_checker=info,alerts=info,dispatcher=info")
            }),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(url) = args.database_url {
        config.database_url = url;
    }

    let db = Database::connect(&config.database_url).await?;
    db.migrate().await?;

    let alerts = Arc::new(AlertEngine::new(config.alerts.clone()));

    match args.command {
        Command::Run => run(db.clone(), alerts, &config).await?,
        Command::Check { max_concurrent } => {
            let mut checker_config = config.checker.clone();
            if let Some(max_concurrent) = max_concurrent {
                checker_config.max_concurrent = max_concurrent;
            }
            let checker = HealthChecker::new(db.clone(), HttpProber::new(config.probe.clone())?, alerts, checker_config);
            let report = checker.run_pass(None).await?;
            info!(
                due = report.due,
                checked = report.checked,
                healthy = report.healthy,
                unhealthy = report.unhealthy,
                became_broken = report.became_broken,
                recovered = report.recovered,
                errors = report.errors,
                "Check finished"
            );
        }
        Command::CheckLink { link_id } => {
            let checker = HealthChecker::new(db.clone(), HttpProber::new(config.probe.clone())?, alerts, config.checker.clone());
            let record = checker.check_link(&link_id).await?;
            info!(
                link_id = %record.link_id,
                previous_status = %record.previous_status,
                status = %record.status,
                status_code = ?record.status_code,
                response_ms = record.response_time.as_millis() as u64,
                "Link checked"
            );
        }
        Command::Dispatch { batch_size } => {
            let dispatcher = Dispatcher::new(db.clone(), channel(&db)?, config.dispatcher.clone());
            dispatcher.release_stale_claims().await?;
            let report = dispatcher
                .drain_pending(batch_size.unwrap_or(config.dispatcher.batch_size))
                .await?;
            info!(
                due = report.candidates,
                sent = report.sent,
                failed = report.failed,
                lost_claims = report.lost_claims,
                errors = report.errors,
                "Dispatch finished"
            );
        }
        Command::MonthlyReport { period } => {
            let period = match period {
                Some(period) => period.parse::<ReportPeriod>()?,
                None => ReportPeriod::previous(Utc::now())?,
            };
            let run = alerts.run_monthly_reports(&db, period).await?;
            info!(
                period = %period,
                generated = run.generated,
                errors = run.errors,
                "Monthly reports finished"
            );
        }
        Command::Requeue { entry_id } => {
            let dispatcher = Dispatcher::new(db.clone(), LoggingChannel, config.dispatcher.clone());
            let entry = dispatcher.requeue(&entry_id).await?;
            info!(failed_entry = %entry_id, entry_id = %entry.id, "Notification requeued");
        }
    }

    db.close().await;
    Ok(())
}

/// Run every loop until Ctrl+C.
async fn run(db: Database, alerts: Arc<AlertEngine>, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let checker = HealthChecker::new(
        db.clone(),
        HttpProber::new(config.probe.clone())?,
        alerts.clone(),
        config.checker.clone(),
    );
    let dispatcher = Dispatcher::new(db.clone(), channel(&db)?, config.dispatcher.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    info!("LinkGuard running. Press Ctrl+C to stop.");

    let (checked, dispatched, reported, ()) = tokio::join!(
        checker.run_with_shutdown(shutdown(shutdown_rx.clone())),
        dispatcher.run_with_shutdown(shutdown(shutdown_rx.clone())),
        alerts.run_reports_with_shutdown(&db, config.report_interval, shutdown(shutdown_rx)),
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
            }
            info!("Shutting down");
            let _ = shutdown_tx.send(true);
        },
    );

    checked?;
    dispatched?;
    reported?;

    let stats = checker.stats();
    info!(
        passes = stats.passes,
        checks = stats.checks,
        success_rate = stats.success_rate(),
        "LinkGuard stopped"
    );
    Ok(())
}

/// Resolves once the shutdown flag is raised or its sender is gone.
fn shutdown(mut rx: watch::Receiver<bool>) -> impl Future<Output = ()> + Send {
    async move {
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

/// Email when SMTP is configured, log output otherwise.
fn channel(db: &Database) -> Result<Box<dyn NotificationChannel>, Box<dyn std::error::Error>> {
    match MailerConfig::from_env() {
        Ok(mailer_config) => {
            info!(host = %mailer_config.smtp_host, "Delivering notifications by email");
            Ok(Box::new(EmailChannel::new(Mailer::new(mailer_config)?, db.clone())))
        }
        Err(MailerError::MissingEnvVar(var)) => {
            warn!(missing = %var, "SMTP not configured, notifications will only be logged");
            Ok(Box::new(LoggingChannel))
        }
        Err(e) => Err(e.into()),
    }
}
