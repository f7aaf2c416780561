// src/resilience/retry.rs
//! Retry policy shared by every outbound HTTP call.
//!
//! Retries 5xx, 429 and transport failures with exponential backoff.
//! Any other status goes back to the caller untouched.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use thiserror::Error;

/// Errors at the HTTP boundary. Callers match on these to tell a terminal
/// status (skip the item) from a transport failure that outlived its retries.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("{api}: transport failure after {attempts} attempt(s): {source}")]
    Transport {
        api: &'static str,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("{api}: HTTP {status}: {body}")]
    Status {
        api: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("{api}: failed to decode response: {source}")]
    Decode {
        api: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl HttpError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
        }
    }

    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// `attempt` is zero-based: attempt 0 is the first request.
    pub fn should_retry(&self, status: StatusCode, attempt: u32) -> bool {
        attempt < self.max_retries && is_transient(status)
    }

    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

pub fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Send `request`, retrying per `policy`.
///
/// A retryable status on the final attempt is returned as-is; a transport
/// failure on the final attempt becomes [`HttpError::Transport`].
pub async fn send_with_retry(
    api: &'static str,
    request: RequestBuilder,
    policy: &RetryPolicy,
) -> Result<Response, HttpError> {
    let mut attempt: u32 = 0;
    loop {
        // Bodies here are JSON or empty, so cloning only fails for streams.
        let Some(req) = request.try_clone() else {
            return request.send().await.map_err(|source| HttpError::Transport {
                api,
                attempts: 1,
                source,
            });
        };

        match req.send().await {
            Ok(resp) => {
                let status = resp.status();
                if !policy.should_retry(status, attempt) {
                    return Ok(resp);
                }
                let delay = policy.backoff_for(attempt);
                tracing::debug!(
                    api,
                    %status,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient status, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(source) => {
                if attempt >= policy.max_retries {
                    return Err(HttpError::Transport {
                        api,
                        attempts: attempt + 1,
                        source,
                    });
                }
                let delay = policy.backoff_for(attempt);
                tracing::debug!(
                    api,
                    error = %source,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transport failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
        attempt += 1;
    }
}

/// Turn a non-2xx response into [`HttpError::Status`], keeping the body text.
pub async fn ensure_success(api: &'static str, resp: Response) -> Result<Response, HttpError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(HttpError::Status { api, status, body })
}
