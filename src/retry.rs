use log::warn;
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn with_max_retries(max_retries: usize) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Sends the request built by `make_request`, rebuilding and resending it
/// while the outcome is retryable and retries remain.
///
/// The last response is returned whatever its status; callers decide what a
/// non-success status means.
pub async fn send_with_retry<F>(
    policy: &BackoffPolicy,
    what: &str,
    mut make_request: F,
) -> Result<Response, reqwest::Error>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 0;
    loop {
        let outcome = make_request().send().await;
        let disposition = match &outcome {
            Ok(resp) => classify_status(resp.status()),
            Err(err) => classify_reqwest_error(err),
        };

        if disposition == RetryDisposition::NonRetryable || attempt >= policy.max_retries {
            return outcome;
        }

        let delay = policy.delay_for_attempt(attempt);
        match &outcome {
            Ok(resp) => warn!(
                "{} returned {}, retrying in {:?} (attempt {}/{})",
                what,
                resp.status(),
                delay,
                attempt + 1,
                policy.max_retries
            ),
            Err(err) => warn!(
                "{} failed: {}, retrying in {:?} (attempt {}/{})",
                what,
                err,
                delay,
                attempt + 1,
                policy.max_retries
            ),
        }
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
