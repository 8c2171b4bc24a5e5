use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::ConverseError;

/// Total attempts per turn, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Bounded retry around a single turn attempt.
///
/// Holds no state between invocations, so one policy can wrap any number of turns.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    retryable: fn(&ConverseError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: Duration::ZERO,
            retryable: ConverseError::is_transient,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// At least one attempt is always made.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Pause between a failed attempt and the next one.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_classifier(mut self, retryable: fn(&ConverseError) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Runs `attempt` until it succeeds, fails with a non-retryable error, or the
    /// bound is reached. `attempt` gets exclusive access to `ctx` and the 1-based
    /// attempt number. The last failure is returned unchanged.
    pub async fn run<C, T, F>(&self, ctx: &mut C, mut attempt: F) -> Result<T, ConverseError>
    where
        C: ?Sized,
        F: for<'c> FnMut(&'c mut C, u32) -> BoxFuture<'c, Result<T, ConverseError>>,
    {
        let mut number = 1;
        loop {
            match attempt(ctx, number).await {
                Ok(value) => return Ok(value),
                Err(e) if number < self.max_attempts && (self.retryable)(&e) => {
                    tracing::warn!(
                        "attempt {}/{} failed, retrying: {}",
                        number,
                        self.max_attempts,
                        e
                    );
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                    number += 1;
                }
                Err(e) => {
                    if (self.retryable)(&e) {
                        tracing::error!("giving up after {} attempts: {}", number, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}
