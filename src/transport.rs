//! Polite, rate-limited HTTP transport.
//!
//! Every source owns one [`Transport`]. Each request:
//!
//! 1. waits until a uniformly random delay in `[min_delay, max_delay]` has
//!    passed since the previous request on this instance finished;
//! 2. carries a `User-Agent` drawn from a small pool, unless the caller set one;
//! 3. is retried with exponential backoff while the response status is in
//!    [`RetryPolicy::RETRY_STATUSES`] and the retry budget lasts.
//!
//! Exhausting the retry budget is not an error: the last response is
//! returned and the caller decides what a non-2xx status means (usually via
//! [`FetchResponse::error_for_status`]). Network failures are returned
//! immediately as [`TransportError::Request`].

use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::config::TransportConfig;

/// Client identities rotated across requests.
pub const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120 Safari/537.36",
];

const BACKOFF_MAX: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid proxy '{proxy}': {source}")]
    Proxy {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },
}

/// Per-call options for [`Transport::get`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: HeaderMap,
    /// Proxy URL applied to all schemes, e.g. `socks5h://127.0.0.1:9050`.
    pub proxy: Option<String>,
    /// Overrides the transport's default timeout.
    pub timeout: Option<Duration>,
}

/// What to do with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    Return,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub total_retries: u32,
    pub backoff_factor: Duration,
}

impl RetryPolicy {
    pub const RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

    /// Decide after the `attempt`-th response (0-based).
    ///
    /// Retryable statuses back off `factor * 2^attempt`, raised to any
    /// `Retry-After` the server sent, capped at two minutes. Everything
    /// else is returned to the caller.
    pub fn decide(
        &self,
        status: StatusCode,
        attempt: u32,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        if !Self::RETRY_STATUSES.contains(&status.as_u16()) || attempt >= self.total_retries {
            return RetryDecision::Return;
        }
        let backoff = self
            .backoff_factor
            .saturating_mul(1u32 << attempt.min(16))
            .max(retry_after.unwrap_or_default())
            .min(BACKOFF_MAX);
        RetryDecision::Retry(backoff)
    }
}

/// A fully-read HTTP response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// Number of requests issued for this call, retries included.
    pub attempts: u32,
}

impl FetchResponse {
    pub fn error_for_status(self) -> Result<Self, TransportError> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(TransportError::Status {
                url: self.url,
                status: self.status,
            })
        }
    }

    /// Body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub struct Transport {
    min_delay: Duration,
    max_delay: Duration,
    timeout: Duration,
    policy: RetryPolicy,
    /// One client per proxy URL (`None` = direct).
    clients: Mutex<HashMap<Option<String>, Client>>,
    /// End of the previous request; held across a whole call so pacing is serialized.
    last_request: tokio::sync::Mutex<Option<Instant>>,
}

impl Transport {
    pub fn new(config: &TransportConfig, timeout: Duration) -> Self {
        Self {
            min_delay: secs(config.min_delay_secs),
            max_delay: secs(config.max_delay_secs.max(config.min_delay_secs)),
            timeout,
            policy: RetryPolicy {
                total_retries: config.total_retries,
                backoff_factor: secs(config.backoff_factor_secs),
            },
            clients: Mutex::new(HashMap::new()),
            last_request: tokio::sync::Mutex::new(None),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn get(
        &self,
        url: &str,
        opts: RequestOptions,
    ) -> Result<FetchResponse, TransportError> {
        let client = self.client_for(opts.proxy.as_deref())?;
        let timeout = opts.timeout.unwrap_or(self.timeout);
        let mut headers = opts.headers;
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, HeaderValue::from_static(random_user_agent()));
        }

        let mut last = self.last_request.lock().await;
        self.pace(*last).await;

        let result = self.get_with_retries(&client, url, &headers, timeout).await;
        *last = Some(Instant::now());
        result
    }

    async fn pace(&self, last: Option<Instant>) {
        let Some(last) = last else {
            return;
        };
        let delay = if self.max_delay > self.min_delay {
            rand::thread_rng().gen_range(self.min_delay..=self.max_delay)
        } else {
            self.min_delay
        };
        let elapsed = last.elapsed();
        if elapsed < delay {
            tokio::time::sleep(delay - elapsed).await;
        }
    }

    async fn get_with_retries(
        &self,
        client: &Client,
        url: &str,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<FetchResponse, TransportError> {
        let mut attempt = 0u32;
        loop {
            let response = client
                .get(url)
                .headers(headers.clone())
                .timeout(timeout)
                .send()
                .await?;

            let status = response.status();
            let retry_after = parse_retry_after(response.headers());

            match self.policy.decide(status, attempt, retry_after) {
                RetryDecision::Retry(backoff) => {
                    debug!(
                        url,
                        status = status.as_u16(),
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(backoff).await;
                }
                RetryDecision::Return => {
                    let final_url = response.url().to_string();
                    let headers = response.headers().clone();
                    let body = response.bytes().await?.to_vec();
                    return Ok(FetchResponse {
                        url: final_url,
                        status,
                        headers,
                        body,
                        attempts: attempt + 1,
                    });
                }
            }
        }
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, TransportError> {
        let key = proxy.map(str::to_string);
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder();
        if let Some(p) = proxy {
            let proxy_cfg = reqwest::Proxy::all(p).map_err(|source| TransportError::Proxy {
                proxy: p.to_string(),
                source,
            })?;
            builder = builder.proxy(proxy_cfg);
        }
        let client = builder.build().map_err(|source| TransportError::Proxy {
            proxy: proxy_label(proxy),
            source,
        })?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

fn proxy_label(proxy: Option<&str>) -> String {
    proxy.unwrap_or("direct").to_string()
}

fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Negative and NaN values clamp to zero, overflowing ones to the backoff cap.
fn secs(value: f64) -> Duration {
    if value.is_nan() {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(BACKOFF_MAX)
}
