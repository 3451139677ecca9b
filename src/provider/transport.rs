use super::error::{Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Response, StatusCode, Url};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum GoogleAuth {
    ApiKey(String),
    BearerToken(String),
}

/// Exponential backoff for transient transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn is_transient_error(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect()
}

/// Authenticated access to the Generative Language API.
#[derive(Debug, Clone)]
pub struct Transport {
    http: reqwest::Client,
    auth: GoogleAuth,
    api_base: Url,
    retry: RetryPolicy,
    request_timeout: Option<Duration>,
}

impl Transport {
    pub fn new(http: reqwest::Client, auth: GoogleAuth, base_uri: &str, retry: RetryPolicy) -> Result<Self> {
        // Url::join drops the last path segment unless the base ends in '/'.
        let base = if base_uri.ends_with('/') {
            base_uri.to_string()
        } else {
            format!("{base_uri}/")
        };
        let api_base = Url::parse(&base).map_err(|e| Error::InvalidRequest(format!("{base_uri}: {e}")))?;
        Ok(Self {
            http,
            auth,
            api_base,
            retry,
            request_timeout: None,
        })
    }

    /// Bounds each buffered request, body included. Streaming calls are exempt.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Resolves `path` against the API base and applies key auth.
    pub fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self
            .api_base
            .join(path)
            .map_err(|e| Error::InvalidRequest(format!("{path}: {e}")))?;

        let key = match &self.auth {
            GoogleAuth::ApiKey(key) => Some(("key", key.as_str())),
            GoogleAuth::BearerToken(_) => None,
        };
        // query_pairs_mut() leaves a dangling '?' when nothing is appended.
        if !query.is_empty() || key.is_some() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query.iter().copied().chain(key) {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut h = HeaderMap::new();
        if let GoogleAuth::BearerToken(tok) = &self.auth {
            let v = HeaderValue::from_str(&format!("Bearer {tok}"))
                .map_err(|e| Error::InvalidRequest(format!("bearer token is not a valid header: {e}")))?;
            h.insert(AUTHORIZATION, v);
        }
        Ok(h)
    }

    /// Sends the request built by `make`, retrying transient failures.
    ///
    /// `make` runs once per attempt. The last response is returned as-is,
    /// whatever its status; callers decide what a non-2xx means.
    pub async fn send<F>(&self, what: &str, make: F) -> Result<Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        self.send_with(what, self.request_timeout, make).await
    }

    /// Like [`Transport::send`], without the per-request timeout, for
    /// responses whose body is read incrementally.
    pub async fn send_streaming<F>(&self, what: &str, make: F) -> Result<Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        self.send_with(what, None, make).await
    }

    async fn send_with<F>(&self, what: &str, timeout: Option<Duration>, make: F) -> Result<Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let headers = self.headers()?;
        let mut attempt = 0;
        loop {
            let mut req = make(&self.http).headers(headers.clone());
            if let Some(t) = timeout {
                req = req.timeout(t);
            }
            let outcome = req.send().await;
            let can_retry = attempt < self.retry.max_retries;
            match outcome {
                Ok(resp) if can_retry && is_transient_status(resp.status()) => {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        what,
                        status = resp.status().as_u16(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "transient HTTP status; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(resp) => return Ok(resp),
                Err(e) if can_retry && is_transient_error(&e) => {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        what,
                        error = %e,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "transport error; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
            attempt += 1;
        }
    }
}

/// Reads the body of a non-2xx response into a [`Error::ProviderRejected`].
pub async fn rejected(resp: Response) -> Error {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Error::ProviderRejected { status, body }
}
