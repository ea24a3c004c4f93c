//! Retry loop for outbound requests.
//!
//! Transient statuses (429, 500, 502, 503, 504) and transient transport
//! errors (timeouts, resets, refused connections) are retried with
//! exponential backoff, honoring `Retry-After` when the server sends one.
//! Everything else is surfaced on the first occurrence.

use super::error::TransferError;
use reqwest::{RequestBuilder, Response, StatusCode, header::RETRY_AFTER};
use serde_json::Value;
use std::{error::Error as StdError, future::Future, io, time::Duration};
use tracing::{debug, warn};

const RETRYABLE_STATUSES: [StatusCode; 5] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Same classification, but a single attempt. Used for bodies that can
    /// only be produced once.
    pub fn once(self) -> Self {
        Self {
            max_attempts: 1,
            ..self
        }
    }

    /// `base × 2^retry`, capped at `max_delay`. `retry` counts from zero.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

/// Transport failures worth another attempt. DNS and TLS failures surface
/// as other error kinds and are terminal.
pub fn is_transient(err: &reqwest::Error) -> bool {
    if err.is_timeout() {
        return true;
    }
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::TimedOut
            );
        }
        source = cause.source();
    }
    false
}

/// `Retry-After` in whole seconds. HTTP-date values are ignored.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Send the request produced by `build` until it succeeds, fails terminally,
/// or the policy runs out of attempts.
///
/// `build` is called once per attempt so replayable bodies can be rebuilt
/// (a file reopened, a stream rewound). A 2xx response is returned as is.
pub async fn send_with_retry<F, Fut>(
    policy: &RetryPolicy,
    mut build: F,
) -> Result<Response, TransferError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<RequestBuilder, TransferError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let request = build().await?;
        let (delay, last) = match request.send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) if is_retryable_status(response.status()) => {
                let status = response.status();
                let delay = retry_after(&response)
                    .map(|d| d.min(policy.max_delay))
                    .unwrap_or_else(|| policy.backoff(attempt - 1));
                (delay, format!("server returned {status}"))
            }
            Ok(response) => return Err(rejected(response).await),
            Err(err) if is_transient(&err) => (policy.backoff(attempt - 1), err.to_string()),
            Err(err) => return Err(TransferError::Terminal(describe(&err))),
        };

        if attempt >= max_attempts {
            return Err(TransferError::RetriesExhausted {
                attempts: attempt,
                last,
            });
        }
        warn!(attempt, max_attempts, ?delay, "{last}, retrying");
        tokio::time::sleep(delay).await;
    }
}

/// Turn a non-retryable response into an error carrying the server's
/// message when it sent one.
async fn rejected(response: Response) -> TransferError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body);
    debug!(status, %message, "request rejected");
    TransferError::Rejected { status, message }
}

fn describe(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
