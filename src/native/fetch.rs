use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::{parse_args, NativeTools, Toolset};
use crate::error::{Error, Result};

const MAX_RESPONSE_SIZE: usize = 1 << 20;
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const TEXT_WIDTH: usize = 120;

#[derive(Deserialize)]
struct FetchInput {
    url: String,
}

/// Backoff schedule for transient fetch failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(300),
            backoff_factor: 2.15,
            max_delay: Duration::from_secs(20),
            jitter: Duration::from_millis(50),
        }
    }
}

impl RetryConfig {
    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        // attempt is 1-based; attempt=1 => initial delay.
        let exp = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
        self.backoff_for_attempt(attempt) + jitter
    }
}

/// Why one attempt failed, and whether another is worth making.
struct Failure {
    error: Error,
    transient: bool,
}

impl Failure {
    fn transient(error: Error) -> Self {
        Self {
            error,
            transient: true,
        }
    }

    fn permanent(error: Error) -> Self {
        Self {
            error,
            transient: false,
        }
    }
}

/// HTTP GET for the model, with HTML pages reduced to text.
pub struct Fetch {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl Fetch {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("mcp-broker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("failed to build fetch client: {e}")))?;
        Ok(Self {
            client,
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Connection errors, 429 and 5xx are retried with backoff; any other
    /// status >= 400 fails at once.
    pub async fn fetch_url(&self, args: &str) -> Result<String> {
        let input: FetchInput = parse_args(args)?;
        let url = reqwest::Url::parse(&input.url)
            .map_err(|e| Error::invalid_input(format!("invalid url {}: {e}", input.url)))?;

        let mut attempt = 0;
        loop {
            match self.fetch_once(url.clone()).await {
                Ok(body) => return Ok(body),
                Err(Failure {
                    error,
                    transient: true,
                }) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::debug!(url = %url, attempt, ?delay, error = %error, "fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(failure) => return Err(failure.error),
            }
        }
    }

    async fn fetch_once(&self, url: reqwest::Url) -> std::result::Result<String, Failure> {
        let mut resp = self.client.get(url).send().await.map_err(|e| {
            Failure::transient(Error::execution(format!("failed to fetch url: {e}")))
        })?;

        let status = resp.status();
        if status.as_u16() >= 400 {
            let error = Error::execution(format!("HTTP {status}"));
            return Err(
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    Failure::transient(error)
                } else {
                    Failure::permanent(error)
                },
            );
        }

        let is_html = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains("html"));

        let mut body = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(|e| {
            Failure::transient(Error::execution(format!("failed to read body: {e}")))
        })? {
            let room = MAX_RESPONSE_SIZE - body.len();
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                break;
            }
            body.extend_from_slice(&chunk);
        }

        if is_html {
            return html2text::from_read(body.as_slice(), TEXT_WIDTH).map_err(|e| {
                Failure::permanent(Error::execution(format!("failed to convert html: {e}")))
            });
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

impl Toolset for Fetch {
    fn register(self: Arc<Self>, tools: &mut NativeTools) {
        tools.register(
            "fetch_url",
            "Fetch content from a URL (HTTP GET)",
            json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "The URL to fetch" }
                },
                "required": ["url"]
            }),
            move |args| {
                let fetch = self.clone();
                async move { fetch.fetch_url(&args).await }
            },
        );
    }
}
