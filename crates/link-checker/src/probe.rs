//! Probe abstraction and result classification.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

/// HTTP method a probe ended up using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    Head,
    Get,
}

impl ProbeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeMethod::Head => "HEAD",
            ProbeMethod::Get => "GET",
        }
    }
}

/// Why a probe was unhealthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// URL could not be parsed or is not http(s).
    InvalidUrl,
    /// No response within the probe timeout.
    Timeout,
    /// DNS, TCP or TLS failure.
    Connection,
    /// Redirect chain longer than the configured limit.
    TooManyRedirects,
    /// Redirect chain revisits a URL.
    RedirectLoop,
    /// Server answered with a 4xx or 5xx status.
    HttpStatus(u16),
    /// Any other transport error.
    Request,
}

impl FailureKind {
    /// Fatal failures mark a link broken without waiting for the threshold.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FailureKind::InvalidUrl | FailureKind::HttpStatus(404) | FailureKind::HttpStatus(410)
        )
    }

    /// Network errors are retried; HTTP answers are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Timeout | FailureKind::Connection)
    }

    /// Stable identifier stored in check history.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidUrl => "invalid_url",
            FailureKind::Timeout => "timeout",
            FailureKind::Connection => "connection",
            FailureKind::TooManyRedirects => "too_many_redirects",
            FailureKind::RedirectLoop => "redirect_loop",
            FailureKind::HttpStatus(_) => "http_status",
            FailureKind::Request => "request",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => f.write_str("Invalid URL"),
            FailureKind::Timeout => f.write_str("Connection timeout"),
            FailureKind::Connection => f.write_str("Connection failed"),
            FailureKind::TooManyRedirects => f.write_str("Too many redirects"),
            FailureKind::RedirectLoop => f.write_str("Redirect loop"),
            FailureKind::HttpStatus(code) => write!(f, "HTTP {}", code),
            FailureKind::Request => f.write_str("Request failed"),
        }
    }
}

/// Result of probing one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// Final HTTP status, if any response arrived.
    pub status_code: Option<u16>,
    pub method: ProbeMethod,
    pub response_time: Duration,
    /// URL after following redirects.
    pub final_url: Option<String>,
    pub redirect_count: u32,
    pub content_type: Option<String>,
    /// `None` when the link is healthy.
    pub failure: Option<FailureKind>,
    pub error_message: Option<String>,
    /// Attempts made, counting network retries.
    pub attempts: u32,
}

impl ProbeOutcome {
    /// Classify a final HTTP status: below 400 is healthy.
    pub fn from_status(status_code: u16, method: ProbeMethod, response_time: Duration) -> Self {
        let failure = (status_code >= 400).then_some(FailureKind::HttpStatus(status_code));
        Self {
            status_code: Some(status_code),
            method,
            response_time,
            final_url: None,
            redirect_count: 0,
            content_type: None,
            failure,
            error_message: None,
            attempts: 1,
        }
    }

    /// An unhealthy outcome without an HTTP response.
    pub fn failed(failure: FailureKind, method: ProbeMethod, response_time: Duration) -> Self {
        let status_code = match failure {
            FailureKind::HttpStatus(code) => Some(code),
            _ => None,
        };
        Self {
            status_code,
            method,
            response_time,
            final_url: None,
            redirect_count: 0,
            content_type: None,
            failure: Some(failure),
            error_message: None,
            attempts: 1,
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.failure.is_none()
    }

    pub fn is_fatal(&self) -> bool {
        self.failure.is_some_and(|f| f.is_fatal())
    }

    /// Short human-readable status, e.g. "HTTP 200" or "Connection timeout".
    pub fn reason(&self) -> String {
        match (self.failure, self.status_code) {
            (Some(failure), _) => failure.to_string(),
            (None, Some(code)) => format!("HTTP {}", code),
            (None, None) => "OK".to_string(),
        }
    }
}

/// Something that can check whether a URL is reachable.
///
/// Implementations never fail; every problem is encoded in the outcome.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeOutcome;
}
