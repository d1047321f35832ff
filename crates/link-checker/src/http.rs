//! HTTP prober built on reqwest.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Client, Method};
use tracing::debug;
use url::Url;

use crate::error::Result;
use crate::probe::{FailureKind, Probe, ProbeMethod, ProbeOutcome};

/// Default per-request timeout (10 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for [`HttpProber`].
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Timeout for each HTTP request.
    pub timeout: Duration,
    /// Attempts per probe when the network fails, the first one included.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub retry_base_delay: Duration,
    /// Redirects followed before giving up.
    pub max_redirects: u32,
    pub user_agent: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            max_redirects: 10,
            user_agent: format!("LinkGuard/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ProbeConfig {
    /// Builder method to set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builder method to set the attempt limit and first retry delay.
    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }
}

/// A response at the end of a redirect chain.
struct Hop {
    status: u16,
    final_url: Url,
    redirects: u32,
    content_type: Option<String>,
}

/// Probes links with `HEAD`, falling back to `GET`.
///
/// Servers that reject `HEAD` (405, 501) or drop the connection are retried
/// with `GET`. Redirects are followed by hand so loops and chain length are
/// visible in the outcome.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: Client,
    config: ProbeConfig,
}

impl HttpProber {
    /// Create a prober with the given configuration.
    pub fn new(config: ProbeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .redirect(Policy::none())
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self { client, config })
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    async fn probe_once(&self, url: &Url) -> ProbeOutcome {
        let started = Instant::now();

        let (method, result) = match self.follow(Method::HEAD, url).await {
            Ok(hop) if !matches!(hop.status, 405 | 501) => (ProbeMethod::Head, Ok(hop)),
            Err((kind, message))
                if matches!(kind, FailureKind::TooManyRedirects | FailureKind::RedirectLoop) =>
            {
                (ProbeMethod::Head, Err((kind, message)))
            }
            _ => {
                debug!(url = %url, "HEAD unusable, retrying with GET");
                (ProbeMethod::Get, self.follow(Method::GET, url).await)
            }
        };

        let elapsed = started.elapsed();
        match result {
            Ok(hop) => {
                let mut outcome = ProbeOutcome::from_status(hop.status, method, elapsed);
                outcome.final_url = Some(hop.final_url.to_string());
                outcome.redirect_count = hop.redirects;
                outcome.content_type = hop.content_type;
                outcome
            }
            Err((kind, message)) => ProbeOutcome::failed(kind, method, elapsed).with_error(message),
        }
    }

    async fn follow(
        &self,
        method: Method,
        url: &Url,
    ) -> std::result::Result<Hop, (FailureKind, String)> {
        let mut current = url.clone();
        let mut visited = HashSet::from([current.to_string()]);

        for redirects in 0..=self.config.max_redirects {
            let response = self
                .client
                .request(method.clone(), current.clone())
                .send()
                .await
                .map_err(classify)?;

            let status = response.status();
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok());

            if let (true, Some(location)) = (status.is_redirection(), location) {
                let next = current
                    .join(location)
                    .map_err(|e| (FailureKind::Request, format!("bad redirect target: {}", e)))?;
                if !visited.insert(next.to_string()) {
                    return Err((FailureKind::RedirectLoop, format!("redirect loop at {}", next)));
                }
                current = next;
                continue;
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            return Ok(Hop {
                status: status.as_u16(),
                final_url: current,
                redirects,
                content_type,
            });
        }

        Err((
            FailureKind::TooManyRedirects,
            format!("more than {} redirects", self.config.max_redirects),
        ))
    }
}

#[async_trait]
impl Probe for HttpProber {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        let parsed = match parse_http_url(url) {
            Ok(parsed) => parsed,
            Err(message) => {
                return ProbeOutcome::failed(FailureKind::InvalidUrl, ProbeMethod::Head, Duration::ZERO)
                    .with_error(message)
            }
        };

        let max_attempts = self.config.max_retries.max(1);
        let mut attempt = 1;
        loop {
            let mut outcome = self.probe_once(&parsed).await;
            outcome.attempts = attempt;

            let retryable = outcome.failure.is_some_and(|f| f.is_retryable());
            if !retryable || attempt >= max_attempts {
                return outcome;
            }

            let delay = self.config.retry_base_delay * 2u32.pow((attempt - 1).min(16));
            debug!(
                url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %outcome.reason(),
                "Retrying probe after network error"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn parse_http_url(url: &str) -> std::result::Result<Url, String> {
    let parsed = Url::parse(url).map_err(|e| e.to_string())?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        "http" | "https" => Err("missing host".to_string()),
        other => Err(format!("unsupported scheme: {}", other)),
    }
}

fn classify(e: reqwest::Error) -> (FailureKind, String) {
    let kind = if e.is_timeout() {
        FailureKind::Timeout
    } else if e.is_connect() {
        FailureKind::Connection
    } else if e.is_redirect() {
        FailureKind::TooManyRedirects
    } else {
        FailureKind::Request
    };
    (kind, e.to_string())
}
