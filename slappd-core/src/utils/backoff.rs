use std::time::Duration;
use tokio::time::Instant;

/// Largest exponent used for the backoff delay (2^10 = 1024 seconds).
pub const MAX_BACKOFF_EXPONENT: u32 = 10;

/// Calculate the backoff delay based on the number of consecutive failures.
///
/// Uses exponential backoff: 2^retry_count seconds, capped at
/// 2^[`MAX_BACKOFF_EXPONENT`].
pub fn calculate_retry_delay(retry_count: u32) -> Duration {
    let seconds = 2u64.pow(retry_count.min(MAX_BACKOFF_EXPONENT));
    Duration::from_secs(seconds)
}

/// Tracks consecutive upstream rate-limit rejections for one account.
#[derive(Debug, Default)]
pub struct RateLimitBackoff {
    failures: u32,
    until: Option<Instant>,
}

impl RateLimitBackoff {
    /// Record a rate-limit rejection at `now` and return the delay before
    /// the next attempt: 2^n seconds after the n-th consecutive rejection.
    pub fn record(&mut self, now: Instant) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = calculate_retry_delay(self.failures);
        self.until = Some(now + delay);
        delay
    }

    /// Time left before polling may resume, `None` if not backing off.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.until = None;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
