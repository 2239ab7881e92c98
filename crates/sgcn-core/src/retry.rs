//! Bounded retry with exponential backoff.

use std::time::Duration;

/// Backoff strategy between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between attempts.
    Fixed {
        /// Delay between attempts.
        delay: Duration,
    },
    /// Uses an exponential delay between attempts.
    ///
    /// The delay after failed attempt `n` (0-based) is `base * factor^n`.
    Exponential {
        base: Duration,
        factor: f64,
        /// Upper bound on any single delay.
        max: Duration,
        /// Whether to apply random jitter (+/- 50%) to the delay.
        jitter: bool,
    },
}

impl Backoff {
    /// Doubling backoff starting at one `time_unit`, without jitter.
    pub fn doubling(time_unit: Duration) -> Self {
        Self::Exponential {
            base: time_unit,
            factor: 2.0,
            max: time_unit.saturating_mul(16),
            jitter: false,
        }
    }

    /// Delay after the failed attempt with 0-based index `attempt`.
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let seconds = base.as_secs_f64() * factor.powi(exponent);
                let capped_seconds = seconds.min(max.as_secs_f64());
                let delay = Duration::from_secs_f64(capped_seconds);

                if !jitter {
                    return delay;
                }

                let jitter_ms = (delay.as_millis() as f64 * 0.5) as u64;
                let random_offset = fastrand::u64(0..=(jitter_ms * 2));
                let total_ms = delay.as_millis() as i64 + (random_offset as i64 - jitter_ms as i64);
                Duration::from_millis(total_ms.max(0) as u64)
            }
        }
    }
}

/// How many times a fetch is attempted and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub const DEFAULT_ATTEMPTS: u32 = 5;

    /// Five attempts with delays of 1, 2, 4, 8 time units between them.
    pub fn for_time_unit(time_unit: Duration) -> Self {
        Self {
            max_attempts: Self::DEFAULT_ATTEMPTS,
            backoff: Backoff::doubling(time_unit),
        }
    }

    /// A single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Fixed {
                delay: Duration::ZERO,
            },
        }
    }

    /// Delay to wait after failed attempt `attempt` (0-based), or `None` when
    /// that attempt was the last one.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt.saturating_add(1) >= self.max_attempts {
            return None;
        }
        Some(self.backoff.delay(attempt))
    }

    /// Sum of all delays a fully failing fetch sleeps through.
    pub fn total_delay(&self) -> Duration {
        (0..self.max_attempts)
            .filter_map(|attempt| self.delay_after(attempt))
            .sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::for_time_unit(Duration::from_secs(1))
    }
}
