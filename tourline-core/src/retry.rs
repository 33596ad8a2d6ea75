//! Exponential backoff for store calls made from the reconciliation path.
//!
//! Only errors classified as transient are retried; anything else is
//! returned to the caller on the first attempt.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{BookingError, StoreError};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            ..Self::default()
        }
    }

    /// delay = initial_delay * multiplier^attempt, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(delay_ms as u64);
        delay.min(self.max_delay)
    }
}

/// Errors that can say whether another attempt might succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

impl Retryable for BookingError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

pub async fn retry_transient<F, Fut, T, E>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!("{} succeeded after {} retries", label, attempt);
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    "{} failed with transient error (attempt {}/{}), retrying in {:?}: {}",
                    label,
                    attempt + 1,
                    policy.max_retries + 1,
                    delay,
                    err
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_retryable() {
                    tracing::error!("{} exhausted {} retries: {}", label, policy.max_retries, err);
                }
                return Err(err);
            }
        }
    }
}
