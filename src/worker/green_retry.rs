#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Bounds on the GREEN stage: attempt count, aggregate wall time, and the
//! pause between attempts.

use crate::config::parse_clamped;
use crate::ports::Clock;
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_MAX_GREEN_ATTEMPTS: u32 = 2;
pub const MIN_GREEN_ATTEMPTS: u32 = 1;
pub const MAX_GREEN_ATTEMPTS: u32 = 10;

pub const DEFAULT_MAX_GREEN_RETRY_TIME_SECS: u64 = 600;
pub const MIN_GREEN_RETRY_TIME_SECS: u64 = 60;

pub const DEFAULT_GREEN_RETRY_DELAY_MS: u64 = 0;
pub const MAX_GREEN_RETRY_DELAY_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GreenRetryPolicy {
    max_attempts: u32,
    max_elapsed: Duration,
    delay: Duration,
}

impl GreenRetryPolicy {
    /// Out-of-range values are clamped.
    #[must_use]
    pub fn new(max_attempts: u32, max_elapsed: Duration, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.clamp(MIN_GREEN_ATTEMPTS, MAX_GREEN_ATTEMPTS),
            max_elapsed: max_elapsed.max(Duration::from_secs(MIN_GREEN_RETRY_TIME_SECS)),
            delay: delay.min(Duration::from_millis(MAX_GREEN_RETRY_DELAY_MS)),
        }
    }

    /// Build from raw config strings. Malformed values fall back to defaults.
    #[must_use]
    pub fn from_raw(
        max_attempts: Option<&str>,
        max_elapsed_secs: Option<&str>,
        delay_ms: Option<&str>,
    ) -> Self {
        let attempts = parse_clamped(
            max_attempts,
            u64::from(DEFAULT_MAX_GREEN_ATTEMPTS),
            u64::from(MIN_GREEN_ATTEMPTS),
            u64::from(MAX_GREEN_ATTEMPTS),
        );
        let elapsed = parse_clamped(
            max_elapsed_secs,
            DEFAULT_MAX_GREEN_RETRY_TIME_SECS,
            MIN_GREEN_RETRY_TIME_SECS,
            u64::MAX,
        );
        let delay = parse_clamped(
            delay_ms,
            DEFAULT_GREEN_RETRY_DELAY_MS,
            0,
            MAX_GREEN_RETRY_DELAY_MS,
        );

        Self::new(
            u32::try_from(attempts).unwrap_or(DEFAULT_MAX_GREEN_ATTEMPTS),
            Duration::from_secs(elapsed),
            Duration::from_millis(delay),
        )
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub const fn max_elapsed(&self) -> Duration {
        self.max_elapsed
    }

    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Start counting attempts. The deadline is fixed here and never moves.
    #[must_use]
    pub fn start<'a>(&self, clock: &'a dyn Clock) -> GreenAttempts<'a> {
        GreenAttempts {
            policy: *self,
            clock,
            deadline: clock.now() + self.max_elapsed,
            made: 0,
        }
    }
}

impl Default for GreenRetryPolicy {
    fn default() -> Self {
        Self::from_raw(None, None, None)
    }
}

/// Hands out GREEN attempt numbers until either bound is hit.
pub struct GreenAttempts<'a> {
    policy: GreenRetryPolicy,
    clock: &'a dyn Clock,
    deadline: Instant,
    made: u32,
}

impl GreenAttempts<'_> {
    /// The next attempt number, or `None` once the attempt or time budget is
    /// spent. The first attempt is always granted; later ones wait out the
    /// configured delay first.
    pub async fn next_attempt(&mut self) -> Option<u32> {
        if self.made >= self.policy.max_attempts {
            return None;
        }
        if self.made > 0 {
            if !self.policy.delay.is_zero() {
                self.clock.sleep(self.policy.delay).await;
            }
            if self.clock.now() >= self.deadline {
                debug!(
                    attempts = self.made,
                    max_elapsed_secs = self.policy.max_elapsed.as_secs(),
                    "GREEN time budget spent"
                );
                return None;
            }
        }
        self.made += 1;
        Some(self.made)
    }

    #[must_use]
    pub const fn made(&self) -> u32 {
        self.made
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ManualClock;

    async fn count_attempts(policy: GreenRetryPolicy, clock: &ManualClock, step: Duration) -> u32 {
        let mut attempts = policy.start(clock);
        while attempts.next_attempt().await.is_some() {
            clock.advance(step);
        }
        attempts.made()
    }

    #[test]
    fn defaults_are_two_attempts_ten_minutes_no_delay() {
        let policy = GreenRetryPolicy::default();
        assert_eq!(policy.max_attempts(), 2);
        assert_eq!(policy.max_elapsed(), Duration::from_secs(600));
        assert_eq!(policy.delay(), Duration::ZERO);
    }

    #[test]
    fn raw_values_are_clamped_or_defaulted() {
        let clamped = GreenRetryPolicy::from_raw(Some("50"), Some("5"), Some("99999"));
        assert_eq!(clamped.max_attempts(), 10);
        assert_eq!(clamped.max_elapsed(), Duration::from_secs(60));
        assert_eq!(clamped.delay(), Duration::from_millis(10_000));

        let malformed = GreenRetryPolicy::from_raw(Some("lots"), Some(""), Some("-3"));
        assert_eq!(malformed.max_attempts(), 2);
        assert_eq!(malformed.max_elapsed(), Duration::from_secs(600));
        assert_eq!(malformed.delay(), Duration::ZERO);

        assert_eq!(GreenRetryPolicy::from_raw(Some("0"), None, None).max_attempts(), 1);
    }

    #[tokio::test]
    async fn attempt_count_never_exceeds_requested_maximum() {
        let clock = ManualClock::new();
        let policy = GreenRetryPolicy::new(10, Duration::from_secs(3_600), Duration::ZERO);
        let made = count_attempts(policy, &clock, Duration::from_secs(1)).await;
        assert_eq!(made, 10);
    }

    #[tokio::test]
    async fn slow_attempts_stop_at_the_time_budget() {
        let clock = ManualClock::new();
        let policy = GreenRetryPolicy::new(10, Duration::from_secs(60), Duration::ZERO);
        let made = count_attempts(policy, &clock, Duration::from_secs(15)).await;
        assert!((3..=5).contains(&made), "made {made} attempts");
    }

    #[tokio::test]
    async fn first_attempt_is_granted_even_when_it_overruns() {
        let clock = ManualClock::new();
        let policy = GreenRetryPolicy::new(5, Duration::from_secs(60), Duration::ZERO);
        let made = count_attempts(policy, &clock, Duration::from_secs(120)).await;
        assert_eq!(made, 1);
    }

    #[tokio::test]
    async fn delay_counts_against_the_time_budget() {
        let clock = ManualClock::new();
        let policy = GreenRetryPolicy::new(10, Duration::from_secs(60), Duration::from_secs(10));
        let made = count_attempts(policy, &clock, Duration::from_secs(10)).await;
        assert_eq!(made, 3);
        assert!(clock.elapsed() >= Duration::from_secs(60));
    }
}
