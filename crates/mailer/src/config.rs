use secrecy::{ExposeSecret, SecretString};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::MailerError;

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// Plain connection upgraded with STARTTLS (port 587).
    StartTls,
    /// TLS from the first byte (port 465).
    Implicit,
    /// No encryption. Only for local relays such as a dev mail catcher.
    None,
}

impl FromStr for TlsMode {
    type Err = MailerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "starttls" => Ok(TlsMode::StartTls),
            "tls" | "implicit" | "smtps" => Ok(TlsMode::Implicit),
            "none" | "plain" => Ok(TlsMode::None),
            other => Err(MailerError::Config(format!("Invalid SMTP_TLS: {}", other))),
        }
    }
}

/// Configuration for connecting to an SMTP relay.
#[derive(Debug, Clone)]
pub struct MailerConfig {
    /// SMTP host (default: 127.0.0.1)
    pub smtp_host: String,
    /// SMTP port (default: 587)
    pub smtp_port: u16,
    /// Connection security (default: STARTTLS)
    pub tls: TlsMode,
    /// SMTP login
    pub username: String,
    /// Address notifications are sent from (default: the username)
    pub from_address: String,
    /// Per-message send timeout
    pub timeout: Duration,
    password: SecretString,
}

impl MailerConfig {
    /// Create a new configuration with explicit values.
    pub fn new(
        smtp_host: impl Into<String>,
        smtp_port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let username = username.into();
        Self {
            smtp_host: smtp_host.into(),
            smtp_port,
            tls: TlsMode::StartTls,
            from_address: username.clone(),
            username,
            timeout: Duration::from_secs(30),
            password: SecretString::from(password.into()),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Required:
    /// - `SMTP_USERNAME` - SMTP login
    /// - `SMTP_PASSWORD` - SMTP password
    ///
    /// Optional (with defaults):
    /// - `SMTP_HOST` - Default: 127.0.0.1
    /// - `SMTP_PORT` - Default: 587
    /// - `SMTP_TLS` - `starttls`, `tls` or `none`. Default: starttls
    /// - `SMTP_FROM` - Default: `SMTP_USERNAME`
    /// - `SMTP_TIMEOUT_SECS` - Default: 30
    pub fn from_env() -> Result<Self, MailerError> {
        let smtp_host = env::var("SMTP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let smtp_port = env::var("SMTP_PORT")
            .unwrap_or_else(|_| "587".to_string())
            .parse::<u16>()
            .map_err(|e| MailerError::Config(format!("Invalid SMTP_PORT: {}", e)))?;

        let tls = env::var("SMTP_TLS")
            .unwrap_or_else(|_| "starttls".to_string())
            .parse::<TlsMode>()?;

        let timeout_secs = env::var("SMTP_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .map_err(|e| MailerError::Config(format!("Invalid SMTP_TIMEOUT_SECS: {}", e)))?;

        let username =
            env::var("SMTP_USERNAME").map_err(|_| MailerError::MissingEnvVar("SMTP_USERNAME".to_string()))?;

        let password =
            env::var("SMTP_PASSWORD").map_err(|_| MailerError::MissingEnvVar("SMTP_PASSWORD".to_string()))?;

        let from_address = env::var("SMTP_FROM").unwrap_or_else(|_| username.clone());

        Ok(Self {
            smtp_host,
            smtp_port,
            tls,
            username,
            from_address,
            timeout: Duration::from_secs(timeout_secs),
            password: SecretString::from(password),
        })
    }

    /// Get the password (exposes the secret).
    pub(crate) fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Builder method to set the sender address.
    pub fn with_from_address(mut self, from: impl Into<String>) -> Self {
        self.from_address = from.into();
        self
    }

    /// Builder method to set the connection security.
    pub fn with_tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    /// Builder method to set the send timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
