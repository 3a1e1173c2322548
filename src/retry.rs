//! A non-blocking timer allowing fixed-delay or exponential-backoff
//! retry, living alongside some operation to retry.
//!
//! Adapted from the teacher's `embedded_time`/`nb`-generic retry timer
//! onto plain [`std::time::Instant`] durations — this crate has an
//! allocator and a real clock, so the non-blocking `nb::Result` dance the
//! teacher uses to stay `no_std`-friendly is unnecessary; callers poll
//! [`RetryTimer::what_should_i_do`] each tick instead.

use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::time::Clock;

/// A number of attempts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Attempts(pub u16);

impl std::ops::Sub for Attempts {
  type Output = Attempts;
  fn sub(self, rhs: Attempts) -> Attempts {
    Attempts(self.0.saturating_sub(rhs.0))
  }
}

/// Result of [`RetryTimer::what_should_i_do`]: whether a retry should be
/// attempted or attempts are exhausted.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum YouShould {
  /// Attempts have been exhausted; the retried operation should be
  /// considered poisoned.
  Cry,
  /// Not enough time has passed yet to retry.
  NotYet,
  /// A retry should be performed now.
  Retry,
}

/// Strategy to employ when retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
  /// Generate a random delay between `init_min` and `init_max` for the
  /// first retry, doubling the delay after each subsequent failed
  /// attempt.
  Exponential {
    /// Minimum (inclusive) delay before the second attempt.
    #[serde(with = "millis_duration")]
    init_min: Duration,
    /// Maximum (inclusive) delay before the second attempt.
    #[serde(with = "millis_duration")]
    init_max: Duration,
  },
  /// Generate a random delay between `min` and `max`, multiplied by the
  /// attempt number, and wait until it has passed between attempts.
  Delay {
    /// Minimum (inclusive) per-attempt delay.
    #[serde(with = "millis_duration")]
    min: Duration,
    /// Maximum (inclusive) per-attempt delay.
    #[serde(with = "millis_duration")]
    max: Duration,
  },
}

mod millis_duration {
  use std::time::Duration;

  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    Ok(Duration::from_millis(u64::deserialize(d)?))
  }
}

impl Strategy {
  /// Whether `min` and `max` differ, i.e. whether jitter should be
  /// sampled at all.
  pub fn has_jitter(&self) -> bool {
    let r = self.range();
    r.start() != r.end()
  }

  /// The min/max delay as an inclusive range, in milliseconds.
  pub fn range(&self) -> RangeInclusive<u64> {
    match self {
      | Self::Delay { min, max } => millis(*min)..=millis(*max),
      | Self::Exponential { init_min, init_max } => millis(*init_min)..=millis(*init_max),
    }
  }

  /// The total time this strategy will take if `max_attempts` all fail.
  pub fn max_time(&self, max_attempts: Attempts) -> Duration {
    Duration::from_millis(match self {
                             | Self::Exponential { init_max, .. } => {
                               Self::total_delay_exp(millis(*init_max), max_attempts.0)
                             },
                             | Self::Delay { max, .. } => millis(*max) * max_attempts.0 as u64,
                           })
  }

  /// `init * 2^(attempt - 1)`: total delay before the Nth retry.
  const fn total_delay_exp(init: u64, attempt: u16) -> u64 {
    if attempt == 0 {
      0
    } else {
      init * 2u64.pow((attempt - 1) as u32)
    }
  }
}

fn millis(d: Duration) -> u64 {
  d.as_millis() as u64
}

/// A non-blocking timer that allows a fixed-delay or exponential-backoff
/// retry, living alongside some operation to retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryTimer {
  start: Instant,
  init: Duration,
  strategy: Strategy,
  attempts: Attempts,
  max_attempts: Attempts,
}

impl RetryTimer {
  /// Create a new retrier, seeding jitter (if the strategy has any) from
  /// `start`'s millisecond value.
  pub fn new(start: Instant, strategy: Strategy, max_attempts: Attempts) -> Self {
    let init = if strategy.has_jitter() {
      let seed = start.elapsed().as_nanos() as u64;
      let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
      Duration::from_millis(rng.gen_range(strategy.range()))
    } else {
      Duration::from_millis(*strategy.range().start())
    };

    Self { start, init, strategy, max_attempts, attempts: Attempts(1) }
  }

  /// Ask the retrier what to do after the retried operation has failed
  /// again, given the current time.
  pub fn what_should_i_do(&mut self, now: Instant) -> YouShould {
    if self.attempts >= self.max_attempts {
      return YouShould::Cry;
    }

    let elapsed = now.saturating_duration_since(self.start);
    if self.is_ready(elapsed, self.attempts.0) {
      self.attempts.0 += 1;
      YouShould::Retry
    } else {
      YouShould::NotYet
    }
  }

  /// Check if the strategy says an appropriate time has passed.
  pub fn is_ready(&self, time_passed: Duration, attempts: u16) -> bool {
    if attempts == 0 {
      return true;
    }
    match self.strategy {
      | Strategy::Delay { .. } => millis(time_passed) >= millis(self.init) * attempts as u64,
      | Strategy::Exponential { .. } => {
        millis(time_passed) >= Strategy::total_delay_exp(millis(self.init), attempts)
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test::FakeClock;

  #[test]
  fn delay_retrier_waits_linearly() {
    let clock = FakeClock::new();
    let start = clock.now();
    let mut retry = RetryTimer::new(start,
                                     Strategy::Delay { min: Duration::from_millis(1000),
                                                       max: Duration::from_millis(1000) },
                                     Attempts(3));

    clock.advance(Duration::from_millis(999));
    assert_eq!(retry.what_should_i_do(clock.now()), YouShould::NotYet);

    clock.advance(Duration::from_millis(1));
    assert_eq!(retry.what_should_i_do(clock.now()), YouShould::Retry);

    clock.advance(Duration::from_millis(1000));
    assert_eq!(retry.what_should_i_do(clock.now()), YouShould::Retry);

    assert_eq!(retry.what_should_i_do(clock.now()), YouShould::Cry);
  }

  #[test]
  fn exponential_total_delay_doubles_each_attempt() {
    assert_eq!(Strategy::total_delay_exp(100, 1), 100);
    assert_eq!(Strategy::total_delay_exp(100, 2), 200);
    assert_eq!(Strategy::total_delay_exp(100, 3), 400);
  }
}
