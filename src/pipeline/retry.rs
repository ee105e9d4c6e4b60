//! Retry policy and the single `with_retry` wrapper used around every
//! generation call.
//!
//! ## Backoff
//!
//! The delay before attempt `n` (1-indexed, `n ≥ 2`) is
//! `base_delay_ms × 2^(n-2)`, capped at `max_delay_ms`. With the defaults
//! (500 ms base, 3 attempts) the wait sequence is 500 ms → 1 s.
//!
//! Attempts are strictly sequential. Cancellation is checked before every
//! attempt and interrupts a backoff sleep.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// How many times to try, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Default: 3.
    pub max_attempts: u32,
    /// Delay before the second attempt. Default: 500 ms.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay. Default: 8 s.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps. Handy for tests and offline runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay to wait before `attempt` (1-indexed). Zero for the first attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(32);
        let ms = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(ms.min(self.max_delay_ms))
    }
}

/// Errors that know whether another attempt could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Why `with_retry` gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error; `last` is the final one.
    Exhausted { attempts: u32, last: E },
    /// An attempt failed with a non-retryable error.
    Aborted { attempts: u32, error: E },
    /// Cancellation was requested before an attempt or during backoff.
    Cancelled { attempts: u32 },
}

/// Run `op` under `policy`.
///
/// `op` receives the 1-indexed attempt number. On success returns the value
/// together with the number of attempts it took.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<(T, u32), RetryError<E>>
where
    E: Retryable + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_err: Option<E> = None;

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled {
                attempts: attempt - 1,
            });
        }

        if attempt > 1 {
            let backoff = policy.delay_before(attempt);
            warn!(
                "{}: retry {}/{} after {}ms",
                label,
                attempt,
                max_attempts,
                backoff.as_millis()
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt - 1 });
                }
                _ = sleep(backoff) => {}
            }
        }

        match op(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(e) if e.is_retryable() => {
                warn!("{}: attempt {} failed: {}", label, attempt, e);
                last_err = Some(e);
            }
            Err(e) => {
                warn!("{}: attempt {} failed permanently: {}", label, attempt, e);
                return Err(RetryError::Aborted { attempts: attempt, error: e });
            }
        }
    }

    match last_err {
        Some(last) => Err(RetryError::Exhausted {
            attempts: max_attempts,
            last,
        }),
        // The loop runs at least once and only falls through after a retryable error.
        None => Err(RetryError::Cancelled { attempts: 0 }),
    }
}
