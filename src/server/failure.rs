//! Listener failure policy.

use std::io;
use std::time::{Duration, Instant};

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(300);
pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const DEFAULT_RETRY_RESET_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// What the listener does after a failed bind or accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    After(Duration),
    GiveUp,
}

/// Decides whether the listener survives bind and accept failures.
pub trait FailureHandler: Send {
    fn failed(&mut self, error: &io::Error) -> Retry;

    /// A connection was accepted; the current failure run is over.
    fn succeeded(&mut self);

    /// The listener stopped for good because of `error`.
    fn notify_abnormal_termination(&mut self, message: &str, error: &io::Error);
}

/// Exponential backoff with a retry limit.
///
/// A failure run is forgotten once its first failure is older than the
/// reset interval. Within a run the n-th failure waits
/// `retry_delay * 2^(n-1)` (capped at the reset interval) and failure
/// `max_retries + 1` gives up.
#[derive(Debug, Clone)]
pub struct DefaultFailureHandler {
    retry_delay: Duration,
    max_retries: u32,
    reset_interval: Duration,
    retries: u32,
    first_failure: Option<Instant>,
}

impl Default for DefaultFailureHandler {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAY, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_RESET_INTERVAL)
    }
}

impl DefaultFailureHandler {
    pub fn new(retry_delay: Duration, max_retries: u32, reset_interval: Duration) -> Self {
        Self {
            retry_delay,
            max_retries,
            reset_interval,
            retries: 0,
            first_failure: None,
        }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn failed_at(&mut self, now: Instant) -> Retry {
        if self
            .first_failure
            .is_some_and(|first| now.saturating_duration_since(first) > self.reset_interval)
        {
            self.retries = 0;
            self.first_failure = None;
        }
        self.first_failure.get_or_insert(now);

        self.retries = self.retries.saturating_add(1);
        if self.retries > self.max_retries {
            return Retry::GiveUp;
        }
        Retry::After(calculate_backoff(
            self.retries,
            self.retry_delay,
            self.reset_interval,
        ))
    }
}

impl FailureHandler for DefaultFailureHandler {
    fn failed(&mut self, error: &io::Error) -> Retry {
        let decision = self.failed_at(Instant::now());
        match decision {
            Retry::After(delay) => tracing::warn!(
                error = %error,
                attempt = self.retries,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                "Listener failure, retrying"
            ),
            Retry::GiveUp => tracing::error!(
                error = %error,
                attempts = self.retries,
                "Listener failure, retry limit reached"
            ),
        }
        decision
    }

    fn succeeded(&mut self) {
        self.retries = 0;
        self.first_failure = None;
    }

    fn notify_abnormal_termination(&mut self, message: &str, error: &io::Error) {
        tracing::error!(error = %error, "{message}");
    }
}

/// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`, capped.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponential_base = 2u32.saturating_pow(attempt - 1);
    base.saturating_mul(exponential_base).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let base = Duration::from_millis(300);
        let max = Duration::from_secs(300);

        assert_eq!(calculate_backoff(0, base, max), Duration::ZERO);
        assert_eq!(calculate_backoff(1, base, max), Duration::from_millis(300));
        assert_eq!(calculate_backoff(2, base, max), Duration::from_millis(600));
        assert_eq!(calculate_backoff(4, base, max), Duration::from_millis(2400));
        assert_eq!(calculate_backoff(20, base, max), max);
    }
}
