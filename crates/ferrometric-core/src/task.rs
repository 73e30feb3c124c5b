//! Retry state of one fetch window.
//!
//! ```text
//! Pending -> InFlight -> Succeeded
//!                     -> Retrying { deadline } -> InFlight
//!                     -> Failed
//! ```
//!
//! Transitions depend only on the current state, the attempt outcome, the
//! [`RetryPolicy`] and the supplied `now`; nothing here sleeps or reads a clock.

use std::time::Duration;

use tokio::time::Instant;

use crate::client_pool::FetchError;
use crate::parser::ParseError;
use crate::retry::RetryPolicy;
use crate::store::StoreError;
use crate::FetchWindow;

/// Upper bound on a single retry wait, whatever the policy computes.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    InFlight,
    Retrying { deadline: Instant },
    Succeeded,
    Failed { reason: String },
}

impl TaskState {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. })
    }
}

/// Why an attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    Fetch(FetchError),
    Parse(ParseError),
    Store(StoreError),
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch(error) => write!(f, "{error}"),
            Self::Parse(error) => write!(f, "{error}"),
            Self::Store(error) => write!(f, "{error}"),
        }
    }
}

/// What the driver does after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Try again once `delay` has elapsed. `refetch` is false when only the
    /// persist needs repeating.
    Retry { delay: Duration, refetch: bool },
    Fail { reason: String },
    /// Stop the whole run.
    Abort,
    /// External stop; the task is back in `Pending`.
    Cancelled,
}

/// A fetch window together with its retry bookkeeping.
#[derive(Debug, Clone)]
pub struct FetchTask {
    window: FetchWindow,
    state: TaskState,
    attempts: u32,
    failures: u32,
}

impl FetchTask {
    pub fn new(window: FetchWindow) -> Self {
        Self {
            window,
            state: TaskState::Pending,
            attempts: 0,
            failures: 0,
        }
    }

    pub fn window(&self) -> &FetchWindow {
        &self.window
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Time left before a retrying task may run again.
    pub fn wait_time(&self, now: Instant) -> Duration {
        match self.state {
            TaskState::Retrying { deadline } => deadline.saturating_duration_since(now),
            _ => Duration::ZERO,
        }
    }

    /// Move to `InFlight`. Returns `false` if the task is terminal, already in
    /// flight or its retry deadline has not passed.
    pub fn begin_attempt(&mut self, now: Instant) -> bool {
        let ready = match self.state {
            TaskState::Pending => true,
            TaskState::Retrying { deadline } => now >= deadline,
            _ => false,
        };
        if ready {
            self.state = TaskState::InFlight;
            self.attempts += 1;
        }
        ready
    }

    pub fn succeed(&mut self) {
        self.state = TaskState::Succeeded;
    }

    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = TaskState::Pending;
        }
    }

    /// Record a failed attempt and decide what happens next.
    pub fn fail(&mut self, failure: &AttemptFailure, policy: &RetryPolicy, now: Instant) -> Disposition {
        if matches!(failure, AttemptFailure::Fetch(FetchError::Cancelled)) {
            self.state = TaskState::Pending;
            return Disposition::Cancelled;
        }
        self.failures += 1;

        let delay = match failure {
            AttemptFailure::Store(StoreError::Integrity(_)) => {
                self.state = TaskState::Failed {
                    reason: failure.to_string(),
                };
                return Disposition::Abort;
            }
            AttemptFailure::Fetch(FetchError::RateLimitedByServer { retry_after }) => {
                policy.throttle_delay(self.failures, *retry_after)
            }
            AttemptFailure::Fetch(error) if error.is_retryable() => policy.backoff.delay(self.failures),
            AttemptFailure::Store(StoreError::Contention(_)) => policy.backoff.delay(self.failures),
            AttemptFailure::Fetch(_) | AttemptFailure::Parse(_) => {
                return self.give_up(failure.to_string());
            }
        };

        if !policy.allows_another(self.attempts) {
            return self.give_up(format!(
                "gave up after {} attempts: {failure}",
                self.attempts
            ));
        }

        let delay = delay.min(MAX_RETRY_DELAY);
        self.state = TaskState::Retrying {
            deadline: now.checked_add(delay).unwrap_or(now),
        };
        Disposition::Retry {
            delay,
            refetch: !matches!(failure, AttemptFailure::Store(_)),
        }
    }

    fn give_up(&mut self, reason: String) -> Disposition {
        self.state = TaskState::Failed {
            reason: reason.clone(),
        };
        Disposition::Fail { reason }
    }
}
