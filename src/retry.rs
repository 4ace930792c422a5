use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Fixed-delay retry budget. Every attempt after the first waits `delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    /// 1 initial attempt + `max_retries` retries.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The classifier aborted, or the budget ran out. Carries the last error
    /// and how many attempts were made.
    Failed { attempts: u32, error: E },
    /// The token was cancelled while waiting between attempts.
    Cancelled { attempts: u32 },
}

/// Retry an async operation with a fixed delay between attempts.
///
/// - `config`: retry budget and delay
/// - `cancel`: checked while waiting between attempts
/// - `classifier`: inspects an error and returns `Retry` or `Abort`
/// - `operation`: the async closure to retry, given the 1-based attempt number
///
/// Returns the first `Ok` result together with the attempt that produced it.
pub async fn retry_with_delay<F, Fut, T, E, C>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    classifier: C,
    operation: F,
) -> Result<(T, u32), RetryError<E>>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let total_attempts = config.total_attempts();
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(val) => return Ok((val, attempt)),
            Err(e) => {
                if classifier(&e) == RetryAction::Abort || attempt >= total_attempts {
                    return Err(RetryError::Failed {
                        attempts: attempt,
                        error: e,
                    });
                }
                tracing::warn!(
                    "Retryable error (attempt {}/{}), retrying in {}s: {}",
                    attempt,
                    total_attempts,
                    config.delay.as_secs(),
                    e
                );
                tokio::select! {
                    _ = tokio::time::sleep(config.delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(RetryError::Cancelled { attempts: attempt });
                    }
                }
                attempt += 1;
            }
        }
    }
}
