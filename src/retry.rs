//! Bounded retry with exponential backoff.
//!
//! [`retry`] is a plain higher-order async function: it owns no call site and
//! knows nothing about HTTP. Whether an error is worth another attempt, and
//! whether it carries its own wait time, is answered by the error type via
//! [`Retryable`]. The wait sequence for the default policy is
//! 1 s → 2 s (three attempts in total).

use crate::error::{ErrorKind, OcrError};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

/// Errors that can tell the retry loop how to treat them.
pub trait Retryable {
    /// Whether another attempt may succeed.
    fn is_retryable(&self) -> bool;

    /// A server-suggested wait that replaces the exponential delay.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for OcrError {
    fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Api
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            OcrError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Upper bound on any single exponential wait.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Attempt budget and delay schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 are treated as 1.
    pub max_attempts: u32,
    /// Wait after the first failure.
    pub base_delay: Duration,
    /// Factor applied to the wait after each further failure.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Exponential wait after failed attempt number `attempt` (1-based),
    /// capped at [`MAX_RETRY_DELAY`].
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        Duration::try_from_secs_f64(
            self.base_delay.as_secs_f64() * self.backoff_multiplier.max(1.0).powi(exp),
        )
        .ok()
        .unwrap_or(MAX_RETRY_DELAY)
        .min(MAX_RETRY_DELAY)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent.
///
/// `op` receives the 1-based attempt number. The error of the last attempt
/// is returned unchanged. A [`Retryable::retry_after`] hint is used verbatim
/// as the next wait; it still consumes one attempt.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                error!("{}: still failing after {} attempts: {}", label, max_attempts, e);
                return Err(e);
            }
            Err(e) => {
                let delay = match e.retry_after() {
                    Some(hint) => {
                        warn!(
                            "{}: rate limited, retrying in {:.1}s ({}/{})",
                            label,
                            hint.as_secs_f32(),
                            attempt,
                            max_attempts
                        );
                        hint
                    }
                    None => {
                        let d = policy.delay_for(attempt);
                        warn!(
                            "{}: attempt {}/{} failed: {}, retrying in {:.1}s",
                            label,
                            attempt,
                            max_attempts,
                            e,
                            d.as_secs_f32()
                        );
                        d
                    }
                };
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
