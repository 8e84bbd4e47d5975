use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

const DEFAULT_BACKOFF_MILLIS: u64 = 1000;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

/// Blocking JSON-over-HTTP transport shared by the provider clients.
///
/// Every request is bounded by the agent's global timeout. Server errors and
/// transport failures are retried with exponential backoff; client errors are
/// returned immediately.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    agent: ureq::Agent,
    retry_attempts: u32,
    backoff: Duration,
}

impl HttpTransport {
    #[inline]
    pub fn new(timeout: Duration, retry_attempts: u32) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        Self {
            agent,
            retry_attempts: retry_attempts.max(1),
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MILLIS),
        }
    }

    /// Base delay before the first retry
    #[inline]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[inline]
    pub fn get(&self, url: &Url, headers: &[(&str, &str)]) -> Result<String> {
        self.request_with_retry(url, || {
            let mut request = self.agent.get(url.as_str());
            for (name, value) in headers {
                request = request.header(*name, *value);
            }
            request
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    #[inline]
    pub fn post_json<T: Serialize>(
        &self,
        url: &Url,
        headers: &[(&str, &str)],
        body: &T,
    ) -> Result<String> {
        let body = serde_json::to_string(body).context("Failed to serialize request body")?;

        self.request_with_retry(url, || {
            let mut request = self
                .agent
                .post(url.as_str())
                .header("Content-Type", "application/json");
            for (name, value) in headers {
                request = request.header(*name, *value);
            }
            request
                .send(&body)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    fn request_with_retry<F>(&self, url: &Url, mut send: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut attempt = 1;
        loop {
            debug!("{} attempt {}/{}", url, attempt, self.retry_attempts);

            let error = match send() {
                Ok(body) => return Ok(body),
                Err(error) => error,
            };

            match classify(&error) {
                Failure::Client(status) => {
                    warn!("{} rejected the request with HTTP {}", url, status);
                    return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                }
                Failure::Fatal => {
                    return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                }
                Failure::Transient => {
                    warn!(
                        "Request to {} failed: {} ({}/{})",
                        url, error, attempt, self.retry_attempts
                    );
                }
            }

            if attempt >= self.retry_attempts {
                error!("Giving up on {} after {} attempts", url, attempt);
                return Err(anyhow::anyhow!("Request error: {}", error));
            }

            let delay = self.backoff * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
            debug!("Waiting {:?} before retry", delay);
            std::thread::sleep(delay);
            attempt += 1;
        }
    }
}

enum Failure {
    /// 4xx other than 429
    Client(u16),
    Transient,
    Fatal,
}

fn classify(error: &ureq::Error) -> Failure {
    match error {
        ureq::Error::StatusCode(status) if *status >= 500 || *status == 429 => Failure::Transient,
        ureq::Error::StatusCode(status) => Failure::Client(*status),
        ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound
        | ureq::Error::Timeout(_)
        | ureq::Error::Io(_) => Failure::Transient,
        _ => Failure::Fatal,
    }
}
