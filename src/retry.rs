//! Bounded exponential-backoff retry loop.
//!
//! [`RetryPolicy::run`] knows nothing about SQL: it calls the operation,
//! looks at [`Error::kind`], and either returns, sleeps and tries again, or
//! gives up with [`Error::RetryExhausted`]. Connections and transactions are
//! acquired inside the operation, so nothing is held across a backoff sleep.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::config::RetryConfig;
use crate::error::{Error, ErrorKind, Result};

/// Exponential delay schedule with jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_ms: u64,
    max_ms: u64,
    multiplier: f64,
    current_ms: u64,
}

impl Backoff {
    #[must_use]
    pub fn new(initial_ms: u64, multiplier: f64, max_ms: u64) -> Self {
        Self {
            initial_ms,
            max_ms,
            multiplier,
            current_ms: initial_ms.min(max_ms),
        }
    }

    /// The next delay, advancing the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current_ms;
        let delay = (base + jitter_ms(base)).min(self.max_ms);

        let next = (self.current_ms as f64 * self.multiplier) as u64;
        self.current_ms = next.clamp(self.initial_ms, self.max_ms);

        Duration::from_millis(delay)
    }
}

/// Up to 20% random jitter so concurrent writers don't retry in lockstep.
fn jitter_ms(base_ms: u64) -> u64 {
    let range = base_ms / 5;
    if range == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=range)
}

/// Retry policy shared by every store operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff_ms: u64,
    backoff_multiplier: f64,
    max_backoff_ms: u64,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            initial_backoff_ms: config.initial_backoff_ms,
            backoff_multiplier: config.backoff_multiplier,
            max_backoff_ms: config.max_backoff_ms,
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(
            self.initial_backoff_ms,
            self.backoff_multiplier,
            self.max_backoff_ms,
        )
    }

    /// Run `op` until it succeeds, fails non-transiently, runs out of
    /// attempts, or `cancel` fires.
    ///
    /// `op` receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// - the operation's own error when it is fatal or an integrity violation
    /// - [`Error::Cancelled`] when cancelled before an attempt or while waiting
    /// - [`Error::RetryExhausted`] wrapping the last transient error
    pub fn run<T, F>(&self, cancel: &CancelToken, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let mut backoff = self.backoff();
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let err = match op(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.kind() != ErrorKind::Transient {
                return Err(err);
            }

            if attempt >= self.max_attempts {
                warn!(
                    error = %err,
                    attempts = attempt,
                    "Retry attempts exhausted"
                );
                return Err(Error::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = cancel.bound(backoff.next_delay());
            warn!(
                error = %err,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Transient failure, retrying after delay"
            );
            if cancel.sleep(delay) {
                return Err(Error::Cancelled);
            }

            attempt += 1;
        }
    }
}
