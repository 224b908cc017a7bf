//! HTTP probing layer.
//!
//! Every call goes through one [`ApiClient`] carrying a bounded timeout and a
//! shared [`RetryPolicy`]. Transient transport failures (timeout, connection
//! reset) are retried with backoff; a response with any status code is never
//! retried, since 4xx/5xx outcomes are data for the rules.

use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::FetchError;

/// Default per-request timeout (10 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded retry with exponential backoff for transient transport failures.
///
/// Injected into [`ApiClient`] once, shared by every call site.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. 1 disables retries.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per subsequent attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Backoff before retrying after the given 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Parsed-or-raw body of a captured response.
#[derive(Debug, Clone)]
pub enum Body {
    Json(Value),
    Text(String),
    Empty,
}

/// The captured outcome of one HTTP call: status, content type and body.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Body,
}

impl ProbeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Content type with parameters (charset etc.) stripped.
    pub fn media_type(&self) -> Option<&str> {
        self.content_type
            .as_deref()
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim())
    }
}

/// Blocking HTTP client wrapper used by every probe.
pub struct ApiClient {
    inner: Client,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self, FetchError> {
        let inner = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stac-probe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| FetchError::Client { source })?;
        Ok(ApiClient { inner, retry })
    }

    pub fn get(&self, url: &str, query: &[(&str, String)]) -> Result<ProbeResponse, FetchError> {
        self.request(Method::GET, url, query, None, None)
    }

    pub fn get_accept(
        &self,
        url: &str,
        query: &[(&str, String)],
        accept: &str,
    ) -> Result<ProbeResponse, FetchError> {
        self.request(Method::GET, url, query, None, Some(accept))
    }

    pub fn post_json(&self, url: &str, body: &Value) -> Result<ProbeResponse, FetchError> {
        self.request(Method::POST, url, &[], Some(body), None)
    }

    pub fn delete(&self, url: &str) -> Result<ProbeResponse, FetchError> {
        self.request(Method::DELETE, url, &[], None, None)
    }

    fn request(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        json: Option<&Value>,
        accept: Option<&str>,
    ) -> Result<ProbeResponse, FetchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut req = self.inner.request(method.clone(), url);
            if !query.is_empty() {
                req = req.query(query);
            }
            if let Some(body) = json {
                req = req.json(body);
            }
            if let Some(accept) = accept {
                req = req.header(ACCEPT, accept);
            }

            debug!(%method, url, attempt, "probe request");
            match req.send() {
                Ok(resp) => return Ok(Self::capture(resp)),
                Err(source) => {
                    let err = Self::classify(url, source);
                    if err.is_transient() && attempt < self.retry.max_attempts {
                        let delay = self.retry.delay_for(attempt);
                        warn!(url, attempt, ?delay, %err, "transient failure, retrying");
                        thread::sleep(delay);
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    fn classify(url: &str, source: reqwest::Error) -> FetchError {
        if source.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else if source.is_builder() {
            FetchError::InvalidUrl {
                url: url.to_string(),
                message: source.to_string(),
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                source,
            }
        }
    }

    fn capture(resp: reqwest::blocking::Response) -> ProbeResponse {
        let url = resp.url().to_string();
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = match resp.text() {
            Ok(text) if text.is_empty() => Body::Empty,
            Ok(text) => match serde_json::from_str(&text) {
                Ok(value) => Body::Json(value),
                Err(_) => Body::Text(text),
            },
            Err(_) => Body::Empty,
        };

        ProbeResponse {
            url,
            status,
            content_type,
            body,
        }
    }
}
