//! Retry policy for remote calls.
//!
//! The decision to retry is a pure function of the error kind and the
//! attempt number; the loop state is an explicit [`RetryState`].

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tasksync_core::ErrorKind;
use tracing::{debug, warn};

use crate::error::AccountingError;

/// An error the retry loop knows how to classify.
pub trait Retryable: Display {
    fn kind(&self) -> ErrorKind;

    /// Server-requested delay in seconds, if any.
    fn retry_after(&self) -> Option<u64> {
        None
    }
}

impl Retryable for AccountingError {
    fn kind(&self) -> ErrorKind {
        AccountingError::kind(self)
    }

    fn retry_after(&self) -> Option<u64> {
        AccountingError::retry_after(self)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// `base * attempt`
    Linear,
    /// `base * 2^(attempt - 1)`
    Exponential,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
    /// Also retry network failures and 5xx, not only 429.
    pub retry_transient: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::mutations()
    }
}

impl RetryPolicy {
    /// Writes: only 429 is retried, with exponential backoff.
    pub fn mutations() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff: Backoff::Exponential,
            retry_transient: false,
        }
    }

    /// Reads: 429, network failures and 5xx are retried with linear backoff.
    pub fn reads() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff: Backoff::Linear,
            retry_transient: true,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Whether a failure of `kind` on attempt number `attempt` (1-based)
    /// should be followed by another attempt.
    pub fn should_retry(&self, kind: ErrorKind, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        match kind {
            ErrorKind::RateLimited => true,
            ErrorKind::TransientNetwork => self.retry_transient,
            _ => false,
        }
    }

    /// Delay before the attempt following `attempt`; `Retry-After` wins.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        let delay = match retry_after {
            Some(secs) => Duration::from_secs(secs),
            None => match self.backoff {
                Backoff::Linear => self.base_delay.saturating_mul(attempt.max(1)),
                Backoff::Exponential => self
                    .base_delay
                    .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1))),
            },
        };
        delay.min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, E, F, Fut>(&self, operation_name: &str, mut operation: F) -> Retried<T, E>
    where
        E: Retryable,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut state = RetryState::new(self.max_attempts);

        loop {
            state.attempt += 1;
            match operation().await {
                Ok(value) => {
                    if state.retries() > 0 {
                        debug!(
                            operation = operation_name,
                            attempt = state.attempt,
                            "Operation succeeded after retries"
                        );
                    }
                    return Retried {
                        retries: state.retries(),
                        result: Ok(value),
                    };
                }
                Err(error) => {
                    if !self.should_retry(error.kind(), state.attempt) {
                        if state.attempt > 1 {
                            warn!(
                                operation = operation_name,
                                attempts = state.attempt,
                                error = %error,
                                "Giving up after retries"
                            );
                        }
                        return Retried {
                            retries: state.retries(),
                            result: Err(error),
                        };
                    }

                    let delay = self.delay_for(state.attempt, error.retry_after());
                    warn!(
                        operation = operation_name,
                        attempt = state.attempt,
                        max_attempts = state.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after retryable error"
                    );
                    state.last_error = Some(error);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Loop state of one retried operation.
#[derive(Debug)]
pub struct RetryState<E = AccountingError> {
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_error: Option<E>,
}

impl<E> RetryState<E> {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            last_error: None,
        }
    }

    pub fn retries(&self) -> u32 {
        self.attempt.saturating_sub(1)
    }
}

/// Outcome of a retried operation plus how many retries it took.
#[derive(Debug)]
pub struct Retried<T, E = AccountingError> {
    pub result: Result<T, E>,
    pub retries: u32,
}
