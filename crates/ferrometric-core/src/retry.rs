//! Backoff schedule and retry limits for fetch tasks.

use std::time::Duration;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay after every failure.
    Fixed { delay: Duration },
    /// `base * factor^(failures - 1)`, capped at `max`.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        /// Spread each delay uniformly over +/- 50%.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(500),
            factor: 2.0,
            max: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn delay(self, failures: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
                let seconds = base.as_secs_f64() * factor.max(1.0).powi(exponent);
                let capped = if seconds.is_finite() {
                    seconds.min(max.as_secs_f64())
                } else {
                    max.as_secs_f64()
                };
                let delay = Duration::from_secs_f64(capped.max(0.0));

                if jitter {
                    apply_jitter(delay)
                } else {
                    delay
                }
            }
        }
    }
}

fn apply_jitter(delay: Duration) -> Duration {
    let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    let spread = millis / 2;
    let offset = fastrand::u64(0..=spread.saturating_mul(2));
    Duration::from_millis(millis.saturating_sub(spread).saturating_add(offset))
}

/// Retry limits shared by all fetch tasks of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per window, the first one included.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Wait after a provider throttle that carried no `Retry-After`.
    pub throttle_cooldown: Duration,
    /// Ceiling on any throttle wait, whatever the provider asks for.
    pub max_throttle_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::default(),
            throttle_cooldown: Duration::from_secs(30),
            max_throttle_wait: Duration::from_secs(900),
        }
    }
}

impl RetryPolicy {
    pub fn without_jitter(mut self) -> Self {
        if let Backoff::Exponential { jitter, .. } = &mut self.backoff {
            *jitter = false;
        }
        self
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub const fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Wait before the next attempt after a provider throttle, never longer
    /// than `max_throttle_wait`.
    pub fn throttle_delay(&self, failures: u32, retry_after: Option<Duration>) -> Duration {
        self.backoff
            .delay(failures)
            .max(retry_after.unwrap_or(self.throttle_cooldown))
            .min(self.max_throttle_wait)
    }
}
