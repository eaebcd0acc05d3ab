//! Bounded retry for remote calls.

use std::thread;
use std::time::Duration;

use log::warn;

use crate::services::ServiceError;

/// Default number of attempts per remote call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Fixed-delay retry applied to every remote call.
///
/// Only [transient](ServiceError::is_transient) errors are retried. When the
/// final attempt still fails the caller receives
/// [`ServiceError::RetriesExhausted`], which ends the run.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use conflation_core::{RetryPolicy, ServiceError};
///
/// let policy = RetryPolicy::new(3, Duration::ZERO);
/// let mut calls = 0;
/// let value = policy.run("fetch", || {
///     calls += 1;
///     if calls < 3 {
///         Err(ServiceError::Connection { url: "x".into(), message: "reset".into() })
///     } else {
///         Ok(calls)
///     }
/// });
/// assert_eq!(value, Ok(3));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    /// Build a policy; `max_attempts` below one is treated as one.
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Replace the delay between attempts.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Maximum attempts per call.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }

    /// Pause between attempts.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `call` until it succeeds, fails permanently or runs out of attempts.
    ///
    /// # Errors
    ///
    /// Returns non-transient errors unchanged and wraps the last transient
    /// error in [`ServiceError::RetriesExhausted`].
    pub fn run<T, F>(&self, operation: &str, mut call: F) -> Result<T, ServiceError>
    where
        F: FnMut() -> Result<T, ServiceError>,
    {
        let attempts = self.max_attempts();
        let mut attempt = 1;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) if attempt >= attempts => {
                    return Err(ServiceError::RetriesExhausted {
                        operation: operation.to_owned(),
                        attempts,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    warn!(
                        "{operation} failed (attempt {attempt}/{attempts}): {err}; retrying in {}s",
                        self.delay.as_secs()
                    );
                    thread::sleep(self.delay);
                    attempt += 1;
                }
            }
        }
    }
}
