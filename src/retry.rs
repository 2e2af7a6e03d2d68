//! Bounded retries with linear backoff.
//!
//! [`RetryExecutor`] runs an external command up to
//! [`RetryPolicy::max_attempts`] times. After failed attempt `n` it sleeps
//! `base_delay * n` before trying again, so three attempts with a 3 s base
//! delay sleep 3 s and then 6 s.
//!
//! The executor never turns a final failure into an error: it hands the last
//! attempt back as a [`RetryOutcome`] and lets the caller decide what a
//! failure means.
//!
//! With a cancel token set, no further attempt is started once the token
//! fires; the outcome then carries [`CommandOutput::cancelled`] or the
//! last real attempt.

use crate::command::{CommandOutput, CommandSpec, Transport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// How often and how patiently to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryPolicy {
    /// Total number of attempts, including the first (at least 1)
    pub max_attempts: u32,
    /// Delay unit; the wait after attempt `n` is `base_delay * n`
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// Create a policy; `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// A policy that tries exactly once.
    #[must_use]
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Wait inserted after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Blocks the calling thread between attempts.
pub trait Sleeper {
    /// Sleep for `duration`.
    fn sleep(&mut self, duration: Duration);
}

/// [`Sleeper`] using [`std::thread::sleep`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Result of running a command under a [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome {
    /// Number of attempts actually made
    pub attempts: u32,
    /// Output of the last attempt
    pub output: CommandOutput,
    /// Wall-clock time spent in each attempt, backoff excluded
    pub elapsed_per_attempt: Vec<Duration>,
}

impl RetryOutcome {
    /// Whether the last attempt succeeded.
    pub fn succeeded(&self) -> bool {
        self.output.success()
    }

    /// Exit status of the last attempt.
    pub fn exit_code(&self) -> Option<i32> {
        self.output.status
    }

    /// Sum of all attempt durations.
    pub fn total_elapsed(&self) -> Duration {
        self.elapsed_per_attempt.iter().sum()
    }
}

/// Runs commands with bounded retries and linear backoff.
pub struct RetryExecutor {
    policy: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
    cancel: Option<Arc<AtomicBool>>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryExecutor {
    /// Executor that sleeps on the current thread.
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sleeper(policy, Box::new(ThreadSleeper))
    }

    /// Executor with a custom [`Sleeper`].
    pub fn with_sleeper(policy: RetryPolicy, sleeper: Box<dyn Sleeper>) -> Self {
        Self {
            policy,
            sleeper,
            cancel: None,
        }
    }

    /// Stop starting attempts once `token` is set.
    #[must_use]
    pub fn with_cancel_token(mut self, token: Option<Arc<AtomicBool>>) -> Self {
        self.cancel = token;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|token| token.load(Ordering::Relaxed))
    }

    /// The active policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `spec` through `transport` until it succeeds or attempts run out.
    ///
    /// A program that cannot be launched counts as a failed attempt.
    pub fn run(
        &mut self,
        transport: &mut dyn Transport,
        spec: &CommandSpec,
        description: &str,
    ) -> RetryOutcome {
        self.run_attempts(description, |_| {
            transport
                .run(spec)
                .unwrap_or_else(|e| CommandOutput::launch_failure(spec, &e))
        })
    }

    /// Retry an arbitrary attempt closure under this policy.
    ///
    /// `attempt` receives the 1-based attempt number. Used for streamed
    /// transfers, where one attempt is more than a single `run` call.
    pub fn run_attempts(
        &mut self,
        description: &str,
        attempt: impl FnMut(u32) -> CommandOutput,
    ) -> RetryOutcome {
        let policy = self.policy;
        self.run_attempts_with(policy, description, attempt)
    }

    /// [`run_attempts`](Self::run_attempts) under a one-off `policy`,
    /// sharing this executor's sleeper.
    pub fn run_attempts_with(
        &mut self,
        policy: RetryPolicy,
        description: &str,
        mut attempt: impl FnMut(u32) -> CommandOutput,
    ) -> RetryOutcome {
        let max = policy.max_attempts.max(1);
        let mut elapsed_per_attempt = Vec::with_capacity(max as usize);
        let mut number = 1;
        loop {
            if self.is_cancelled() {
                tracing::info!(description, attempts = number - 1, "cancelled");
                return RetryOutcome {
                    attempts: number - 1,
                    output: CommandOutput::cancelled(),
                    elapsed_per_attempt,
                };
            }
            tracing::debug!(description, attempt = number, max_attempts = max, "attempt starting");
            let started = Instant::now();
            let output = attempt(number);
            elapsed_per_attempt.push(started.elapsed());

            if output.success() {
                tracing::info!(description, attempt = number, "completed");
                return RetryOutcome {
                    attempts: number,
                    output,
                    elapsed_per_attempt,
                };
            }

            if number >= max || self.is_cancelled() {
                tracing::warn!(
                    description,
                    attempts = number,
                    exit_code = ?output.status,
                    stderr = output.stderr_summary(),
                    "failed after all attempts"
                );
                return RetryOutcome {
                    attempts: number,
                    output,
                    elapsed_per_attempt,
                };
            }

            let delay = policy.delay_after(number);
            tracing::warn!(
                description,
                attempt = number,
                max_attempts = max,
                exit_code = ?output.status,
                delay_ms = delay.as_millis() as u64,
                "attempt failed, retrying"
            );
            self.sleeper.sleep(delay);
            number += 1;
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Sleeper;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    /// Sleeper that records requested delays instead of sleeping.
    #[derive(Debug, Default, Clone)]
    pub struct RecordingSleeper(pub Rc<RefCell<Vec<Duration>>>);

    impl Sleeper for RecordingSleeper {
        fn sleep(&mut self, duration: Duration) {
            self.0.borrow_mut().push(duration);
        }
    }
}
