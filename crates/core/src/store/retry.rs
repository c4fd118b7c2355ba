//! Retrying unit-of-work wrapper.
//!
//! Each engine operation is written as "read fresh state, decide, commit one
//! batch". When the commit loses an optimistic race or the store reports a
//! transient failure, the whole read-decide-commit cycle runs again from a
//! fresh read, so a losing writer re-validates against the winner's state
//! instead of overwriting it. Business-rule errors are returned immediately.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use carehome_shared::config::EngineConfig;

/// Errors that can distinguish transient failures from business-rule failures.
pub trait TransientError: Sized {
    /// Returns true if re-running the operation may succeed.
    fn is_transient(&self) -> bool;

    /// Wraps the last transient failure once retries are exhausted.
    fn exhausted(operation: &'static str, attempts: u32, last: Self) -> Self;
}

/// Bounded retry policy with linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff step; attempt `n` sleeps `n * backoff`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for RetryPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps (tests, in-process stores).
    #[must_use]
    pub const fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Duration::ZERO,
        }
    }

    /// Runs `attempt` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, E, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: TransientError + fmt::Display,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match attempt().await {
                Err(err) if err.is_transient() => {
                    if attempts > self.max_retries {
                        return Err(E::exhausted(operation, attempts, err));
                    }
                    warn!(operation, attempts, error = %err, "transient store failure, retrying");
                    if !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff * attempts).await;
                    }
                }
                outcome => return outcome,
            }
        }
    }
}
