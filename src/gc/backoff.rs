//! Exponential backoff bounded by a maximum elapsed time.
//!
//! A [`BackoffPolicy`] covers one backoff sequence: the retries made for a
//! single garbage-collection attempt. Each failure asks the policy for the
//! next delay. The delay grows by `multiplier` per step up to
//! `max_interval`, and once the time spent in the sequence plus the next
//! delay would exceed `max_elapsed_time` the policy is exhausted for good.
//!
//! ```text
//!                 next_delay(): elapsed + delay <= max
//!               +------+
//!               |      v
//!        +--------------+   elapsed + delay > max   +-----------+
//!  new → | Accumulating | ------------------------> | Exhausted |
//!        +--------------+                           +-----------+
//! ```
//!
//! The sequence clock starts at the first reported failure, so whether a
//! sequence can grant any delay at all depends only on the configuration:
//! it cannot when `max_elapsed_time < initial_interval`.
//!
//! Sequences never carry over: a fresh policy is created per attempt and
//! dropped on success or exhaustion.

use std::time::Duration;
use tokio::time::Instant;

/// Default growth factor between consecutive delays.
pub const DEFAULT_MULTIPLIER: f64 = 1.5;

/// Default upper bound for a single backoff delay.
pub const MAX_GC_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay granted after the first failure.
    pub initial_interval: Duration,
    /// Growth factor applied after every granted delay. Never below 1.0.
    pub multiplier: f64,
    /// Upper bound for a single delay.
    pub max_interval: Duration,
    /// Upper bound for the whole sequence. `None` never exhausts.
    pub max_elapsed_time: Option<Duration>,
}

impl BackoffConfig {
    /// Creates a configuration starting at `initial_interval`.
    ///
    /// The single-delay cap defaults to [`MAX_GC_INTERVAL`], or to
    /// `initial_interval` if that is larger.
    #[must_use]
    pub fn new(initial_interval: Duration) -> Self {
        Self {
            initial_interval,
            multiplier: DEFAULT_MULTIPLIER,
            max_interval: initial_interval.max(MAX_GC_INTERVAL),
            max_elapsed_time: None,
        }
    }

    /// Sets the growth factor.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // f64::max() is not const on the MSRV
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Sets the single-delay cap.
    #[must_use]
    pub const fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    /// Sets the sequence bound.
    #[must_use]
    pub const fn with_max_elapsed_time(mut self, max_elapsed_time: Option<Duration>) -> Self {
        self.max_elapsed_time = max_elapsed_time;
        self
    }

    /// Starts a new backoff sequence.
    #[must_use]
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.clone())
    }
}

/// Answer to "may I retry, and when?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStep {
    /// Retry after the given delay.
    Retry(Duration),
    /// No further retries in this sequence.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Accumulating,
    Exhausted,
}

/// Stateful backoff calculator for one sequence.
#[derive(Debug)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    state: State,
    current: Duration,
    attempts: u32,
    granted: u32,
    started_at: Instant,
}

impl BackoffPolicy {
    /// Creates a sequence. Its clock starts at the first [`Self::next_delay`].
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.initial_interval.min(config.max_interval);
        Self {
            config,
            state: State::Accumulating,
            current,
            attempts: 0,
            granted: 0,
            started_at: Instant::now(),
        }
    }

    /// Records a failure and returns the next step.
    pub fn next_delay(&mut self) -> BackoffStep {
        self.next_delay_at(Instant::now())
    }

    fn next_delay_at(&mut self, now: Instant) -> BackoffStep {
        if self.attempts == 0 {
            self.started_at = now;
        }
        self.attempts = self.attempts.saturating_add(1);
        if self.state == State::Exhausted {
            return BackoffStep::Exhausted;
        }

        let delay = self.current;
        if let Some(max_elapsed) = self.config.max_elapsed_time {
            let elapsed = now.saturating_duration_since(self.started_at);
            if elapsed.saturating_add(delay) > max_elapsed {
                self.state = State::Exhausted;
                return BackoffStep::Exhausted;
            }
        }

        self.current = self.grow(delay);
        self.granted = self.granted.saturating_add(1);
        BackoffStep::Retry(delay)
    }

    fn grow(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.config.multiplier)
            .unwrap_or(self.config.max_interval)
            .min(self.config.max_interval)
    }

    /// Discards the sequence and starts over from the initial interval.
    pub fn reset(&mut self) {
        self.state = State::Accumulating;
        self.current = self.config.initial_interval.min(self.config.max_interval);
        self.attempts = 0;
        self.granted = 0;
        self.started_at = Instant::now();
    }

    /// Number of failures reported to this sequence.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Number of delays granted so far.
    ///
    /// Zero together with [`Self::is_exhausted`] means the max elapsed time
    /// is smaller than the initial interval.
    #[must_use]
    pub const fn granted(&self) -> u32 {
        self.granted
    }

    /// Returns `true` once the sequence gave up.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.state == State::Exhausted
    }

    /// Time since the first failure of this sequence.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// The configuration this sequence was started with.
    #[must_use]
    pub const fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_close(actual: Duration, expected_ms: u64) {
        let expected = Duration::from_millis(expected_ms);
        let diff = actual.abs_diff(expected);
        assert!(
            diff < Duration::from_micros(1),
            "expected ~{expected:?}, got {actual:?}"
        );
    }

    fn retry_delay(step: BackoffStep) -> Duration {
        match step {
            BackoffStep::Retry(delay) => delay,
            BackoffStep::Exhausted => Duration::MAX,
        }
    }

    #[test]
    fn test_delays_grow_exponentially() {
        let mut policy = BackoffConfig::new(Duration::from_millis(100)).policy();
        let start = policy.started_at;

        assert_close(retry_delay(policy.next_delay_at(start)), 100);
        assert_close(retry_delay(policy.next_delay_at(start)), 150);
        assert_close(retry_delay(policy.next_delay_at(start)), 225);
        assert_eq!(policy.granted(), 3);
        assert_eq!(policy.attempts(), 3);
    }

    #[test]
    fn test_delay_capped_at_max_interval() {
        let mut policy = BackoffConfig::new(Duration::from_millis(100))
            .with_multiplier(10.0)
            .with_max_interval(Duration::from_millis(500))
            .policy();
        let start = policy.started_at;

        assert_close(retry_delay(policy.next_delay_at(start)), 100);
        assert_close(retry_delay(policy.next_delay_at(start)), 500);
        assert_close(retry_delay(policy.next_delay_at(start)), 500);
    }

    #[test]
    fn test_max_interval_never_below_initial() {
        let config = BackoffConfig::new(Duration::from_secs(2 * 60 * 60));
        assert_eq!(config.max_interval, Duration::from_secs(2 * 60 * 60));

        let config = BackoffConfig::new(Duration::from_millis(10));
        assert_eq!(config.max_interval, MAX_GC_INTERVAL);
    }

    #[test]
    fn test_tiny_max_elapsed_exhausts_before_granting() {
        let mut policy = BackoffConfig::new(Duration::from_millis(100))
            .with_max_elapsed_time(Some(Duration::from_nanos(1)))
            .policy();
        let start = policy.started_at;

        assert_eq!(policy.next_delay_at(start), BackoffStep::Exhausted);
        assert_eq!(policy.next_delay_at(start), BackoffStep::Exhausted);
        assert_eq!(policy.granted(), 0);
        assert_eq!(policy.attempts(), 2);
        assert!(policy.is_exhausted());
    }

    #[test]
    fn test_exhausts_when_elapsed_plus_delay_exceeds_max() {
        let mut policy = BackoffConfig::new(Duration::from_millis(100))
            .with_max_elapsed_time(Some(Duration::from_secs(1)))
            .policy();
        let start = policy.started_at;

        assert!(matches!(policy.next_delay_at(start), BackoffStep::Retry(_)));
        let later = start + Duration::from_millis(900);
        // 900ms elapsed + 150ms delay > 1s
        assert_eq!(policy.next_delay_at(later), BackoffStep::Exhausted);
        // Sticky even if asked "earlier".
        assert_eq!(policy.next_delay_at(start), BackoffStep::Exhausted);
        assert_eq!(policy.granted(), 1);
    }

    #[test]
    fn test_unbounded_sequence_never_exhausts() {
        let mut policy = BackoffConfig::new(Duration::from_millis(100)).policy();
        let far_future = policy.started_at + Duration::from_secs(365 * 24 * 60 * 60);

        for _ in 0..64 {
            assert!(matches!(
                policy.next_delay_at(far_future),
                BackoffStep::Retry(_)
            ));
        }
        assert!(!policy.is_exhausted());
    }

    #[test]
    fn test_reset_discards_sequence() {
        let mut policy = BackoffConfig::new(Duration::from_millis(100))
            .with_max_elapsed_time(Some(Duration::from_millis(300)))
            .policy();
        let start = policy.started_at;

        let _ = policy.next_delay_at(start);
        let _ = policy.next_delay_at(start);
        let _ = policy.next_delay_at(start + Duration::from_millis(250));
        assert!(policy.is_exhausted());

        policy.reset();
        assert!(!policy.is_exhausted());
        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.granted(), 0);
        let start = policy.started_at;
        assert_close(retry_delay(policy.next_delay_at(start)), 100);
    }

    #[test]
    fn test_clock_starts_at_first_failure() {
        let mut policy = BackoffConfig::new(Duration::from_millis(100))
            .with_max_elapsed_time(Some(Duration::from_millis(100)))
            .policy();
        let first_failure = policy.started_at + Duration::from_millis(50);

        assert_close(retry_delay(policy.next_delay_at(first_failure)), 100);
        assert_eq!(policy.granted(), 1);
        // 100ms elapsed + 150ms delay > 100ms
        let second_failure = first_failure + Duration::from_millis(100);
        assert_eq!(policy.next_delay_at(second_failure), BackoffStep::Exhausted);
        assert_eq!(policy.granted(), 1);
    }

    #[test]
    fn test_max_elapsed_equal_to_interval_grants_one_delay() {
        let mut policy = BackoffConfig::new(Duration::from_millis(100))
            .with_max_elapsed_time(Some(Duration::from_millis(100)))
            .policy();
        let late = policy.started_at + Duration::from_secs(10);

        assert!(matches!(policy.next_delay_at(late), BackoffStep::Retry(_)));
    }

    #[test]
    fn test_multiplier_clamped_to_one() {
        let config = BackoffConfig::new(Duration::from_millis(100)).with_multiplier(0.25);
        assert!((config.multiplier - 1.0).abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn prop_delays_monotonic_and_capped(
            initial_ms in 1u64..10_000,
            multiplier in 1.0f64..4.0,
            cap_ms in 1u64..100_000,
            steps in 1usize..40,
        ) {
            let mut policy = BackoffConfig::new(Duration::from_millis(initial_ms))
                .with_multiplier(multiplier)
                .with_max_interval(Duration::from_millis(cap_ms))
                .policy();
            let start = policy.started_at;
            let cap = Duration::from_millis(cap_ms);

            let mut previous = Duration::ZERO;
            for _ in 0..steps {
                let delay = retry_delay(policy.next_delay_at(start));
                prop_assert!(delay <= cap);
                prop_assert!(delay >= previous);
                previous = delay;
            }
        }
    }
}
