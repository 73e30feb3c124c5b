//! Admission control against the provider's request quota.
//!
//! Two limits apply to every request:
//!
//! - a requests-per-interval quota (GCRA via `governor`, burst = quota limit),
//! - a ceiling on concurrently in-flight requests (FIFO `tokio` semaphore).
//!
//! Waiters are admitted in arrival order. Nothing is ever rejected; a waiter
//! only gives up when its cancellation token fires.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::Quota;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

type DirectRateLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Limits enforced by a [`RateLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub quota_window: Duration,
    pub quota_limit: u32,
    pub max_in_flight: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            quota_window: Duration::from_secs(60),
            quota_limit: 60,
            max_in_flight: 4,
        }
    }
}

/// Returned when a waiter was cancelled before admission.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("admission cancelled")]
pub struct AdmissionCancelled;

/// Capacity held by one admitted request. Dropping it releases the slot.
#[derive(Debug)]
pub struct Permit {
    _slot: OwnedSemaphorePermit,
}

/// Shared admission controller; clones share the same capacity.
#[derive(Clone)]
pub struct RateLimiter {
    quota: Arc<DirectRateLimiter>,
    slots: Arc<Semaphore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let max_in_flight = config.max_in_flight.max(1);
        Self {
            quota: Arc::new(governor::RateLimiter::direct(quota_from_window(
                config.quota_window,
                config.quota_limit,
            ))),
            slots: Arc::new(Semaphore::new(max_in_flight)),
            config: RateLimitConfig {
                max_in_flight,
                ..config
            },
        }
    }

    /// Wait for an in-flight slot (FIFO), then for quota budget.
    ///
    /// The slot is held while waiting on the quota so that admission order is
    /// the slot order.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Permit, AdmissionCancelled> {
        let slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AdmissionCancelled),
            slot = Arc::clone(&self.slots).acquire_owned() => slot.map_err(|_| AdmissionCancelled)?,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AdmissionCancelled),
            _ = self.quota.until_ready() => Ok(Permit { _slot: slot }),
        }
    }

    /// Return capacity early; equivalent to dropping the permit.
    pub fn release(&self, permit: Permit) {
        drop(permit);
    }

    /// Number of in-flight slots currently free.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub const fn config(&self) -> RateLimitConfig {
        self.config
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32) -> Quota {
    let burst = NonZeroU32::new(quota_limit).unwrap_or(NonZeroU32::MIN);
    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(burst.get())).max(0.001);

    Quota::with_period(Duration::from_secs_f64(seconds_per_cell))
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}
