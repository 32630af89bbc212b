use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::ConnectorError;

pub const MAX_RETRIES: u32 = 5;
pub const MAX_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryParams {
    pub should_retry: bool,
    pub retry_after: Duration,
}

impl RetryParams {
    pub fn new(retry_after: Duration) -> Self {
        Self {
            should_retry: true,
            retry_after: retry_after.min(MAX_DELAY),
        }
    }

    pub fn stop_retrying() -> Self {
        Self {
            should_retry: false,
            retry_after: Duration::ZERO,
        }
    }

    pub fn default_backoff(retry_count: u32) -> Self {
        if retry_count < MAX_RETRIES {
            Self::new(DEFAULT_BACKOFF)
        } else {
            Self::stop_retrying()
        }
    }

    /// Transient failures retry after the server's `Retry-After` when
    /// given, otherwise after the default backoff.
    pub fn for_error(error: &ConnectorError, retry_count: u32) -> Self {
        if retry_count >= MAX_RETRIES || !error.is_transient() {
            return Self::stop_retrying();
        }
        match error.retry_after() {
            Some(after) => Self::new(after),
            None => Self::default_backoff(retry_count),
        }
    }
}

/// Runs `op` until it succeeds or [`RetryParams::for_error`] says to stop.
pub async fn retry_with<T, F, Fut>(mut op: F) -> Result<T, ConnectorError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ConnectorError>>,
{
    let mut retry_count = 0;
    loop {
        match op(retry_count).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let params = RetryParams::for_error(&err, retry_count);
                if !params.should_retry {
                    return Err(err);
                }
                retry_count += 1;
                debug!(retry_count, delay_ms = params.retry_after.as_millis() as u64, "retrying connector call");
                tokio::time::sleep(params.retry_after).await;
            }
        }
    }
}
