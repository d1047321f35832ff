//! Configuration loaded from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use alerts::AlertConfig;
use dispatcher::DispatcherConfig;
use link_checker::{CheckerConfig, ProbeConfig};

/// LinkGuard service configuration.
///
/// SMTP settings are read separately by [`mailer::MailerConfig::from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database URL.
    pub database_url: String,
    pub checker: CheckerConfig,
    pub probe: ProbeConfig,
    pub dispatcher: DispatcherConfig,
    pub alerts: AlertConfig,
    /// How often the monthly report scheduler wakes up.
    pub report_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `DATABASE_URL` | SQLite database URL | `sqlite:linkguard.db?mode=rwc` |
    /// | `CHECK_INTERVAL_MINUTES` | Minutes between check passes | `60` |
    /// | `MAX_CONCURRENT_CHECKS` | Probes running at once | `10` |
    /// | `MAX_BATCH_SIZE` | Links per check pass | `100` |
    /// | `PROBE_TIMEOUT_SECS` | HTTP request timeout | `10` |
    /// | `PROBE_MAX_RETRIES` | Attempts on network errors | `3` |
    /// | `FAILURE_THRESHOLD` | Failures before a link is broken | `3` |
    /// | `JITTER_SECONDS` | Random spread of the check interval | `30` |
    /// | `ERROR_BACKOFF_MINUTES` | First delay after a failed pass | `5` |
    /// | `DISPATCH_INTERVAL_SECS` | Seconds between queue drains | `30` |
    /// | `DISPATCH_BATCH_SIZE` | Entries per queue drain | `50` |
    /// | `NOTIFICATION_COOLDOWN_MINUTES` | Base cooldown per link and type | `30` |
    /// | `STALE_CLAIM_MINUTES` | Age at which a claim is abandoned | `15` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &'static str, default: u64| parse_var(&lookup, name, default);

        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite:linkguard.db?mode=rwc".to_string());

        let interval = Duration::from_secs(minutes_to_secs(
            positive(var("CHECK_INTERVAL_MINUTES", 60)?, "CHECK_INTERVAL_MINUTES")?,
            "CHECK_INTERVAL_MINUTES",
        )?);

        let checker = CheckerConfig {
            max_concurrent: positive(var("MAX_CONCURRENT_CHECKS", 10)?, "MAX_CONCURRENT_CHECKS")? as usize,
            batch_limit: positive(var("MAX_BATCH_SIZE", 100)?, "MAX_BATCH_SIZE")? as usize,
            failure_threshold: i64::try_from(positive(var("FAILURE_THRESHOLD", 3)?, "FAILURE_THRESHOLD")?)
                .map_err(|_| ConfigError::Invalid("FAILURE_THRESHOLD".to_string()))?,
            interval,
            jitter: Duration::from_secs(var("JITTER_SECONDS", 30)?),
            error_backoff: Duration::from_secs(minutes_to_secs(
                var("ERROR_BACKOFF_MINUTES", 5)?,
                "ERROR_BACKOFF_MINUTES",
            )?),
            ..CheckerConfig::default()
        };

        let probe = ProbeConfig {
            timeout: Duration::from_secs(positive(var("PROBE_TIMEOUT_SECS", 10)?, "PROBE_TIMEOUT_SECS")?),
            max_retries: u32::try_from(var("PROBE_MAX_RETRIES", 3)?)
                .map_err(|_| ConfigError::Invalid("PROBE_MAX_RETRIES".to_string()))?,
            ..ProbeConfig::default()
        };

        let minutes = |name: &'static str, default: u64| -> Result<chrono::Duration, ConfigError> {
            i64::try_from(var(name, default)?)
                .ok()
                .and_then(chrono::Duration::try_minutes)
                .ok_or_else(|| ConfigError::Invalid(name.to_string()))
        };

        let dispatcher = DispatcherConfig {
            batch_size: positive(var("DISPATCH_BATCH_SIZE", 50)?, "DISPATCH_BATCH_SIZE")? as usize,
            interval: Duration::from_secs(positive(var("DISPATCH_INTERVAL_SECS", 30)?, "DISPATCH_INTERVAL_SECS")?),
            stale_claim_after: minutes("STALE_CLAIM_MINUTES", 15)?,
            ..DispatcherConfig::default()
        };

        let alerts = AlertConfig {
            notification_cooldown: minutes("NOTIFICATION_COOLDOWN_MINUTES", 30)?,
        };

        Ok(Self {
            database_url,
            checker,
            probe,
            dispatcher,
            alerts,
            report_interval: Duration::from_secs(60 * 60),
        })
    }
}

fn parse_var<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name.to_string())),
        None => Ok(default),
    }
}

fn minutes_to_secs(minutes: u64, name: &'static str) -> Result<u64, ConfigError> {
    minutes
        .checked_mul(60)
        .ok_or_else(|| ConfigError::Invalid(name.to_string()))
}

fn positive(value: u64, name: &'static str) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid(name.to_string()));
    }
    Ok(value)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    Invalid(String),
}
