// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded retries with exponential backoff for plan service requests.

use crate::errors::{ApiError, RetryError};
use rand::{Rng, distr::OpenClosed01};
use std::{future::Future, time::Duration};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Timing limits for requests to the plan service.
///
/// Each request is attempted at most `max_attempts` times. Every attempt is bounded by
/// `attempt_timeout`, and all requests made while acquiring a plan share a single deadline
/// `phase_timeout` after the phase starts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RequestTiming {
    /// The maximum number of attempts per request, including the first.
    pub max_attempts: u32,

    /// The delay before the first retry. Later delays double each time.
    pub initial_delay: Duration,

    /// The maximum delay between attempts, if any.
    pub max_delay: Option<Duration>,

    /// Whether to scale each delay by a random factor in (0.5, 1].
    pub jitter: bool,

    /// The time budget for a single attempt.
    pub attempt_timeout: Duration,

    /// The time budget for the whole plan acquisition phase.
    pub phase_timeout: Duration,
}

impl RequestTiming {
    /// The default number of attempts per request.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

    /// The default delay before the first retry.
    pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(3);

    /// The default time budget for a single attempt.
    pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(15);

    /// The default time budget for the plan acquisition phase.
    pub const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(70);

    /// Returns the deadline for a phase starting now.
    pub fn phase_deadline(&self) -> Instant {
        Instant::now() + self.phase_timeout
    }
}

impl Default for RequestTiming {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            initial_delay: Self::DEFAULT_INITIAL_DELAY,
            max_delay: None,
            jitter: true,
            attempt_timeout: Self::DEFAULT_ATTEMPT_TIMEOUT,
            phase_timeout: Self::DEFAULT_PHASE_TIMEOUT,
        }
    }
}

/// Runs `attempt` until it succeeds, fails with a non-retryable error, runs out of attempts, or
/// runs past `deadline`.
pub(crate) async fn retry<T, F, Fut>(
    timing: &RequestTiming,
    deadline: Instant,
    url: &str,
    mut attempt: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut backoff = BackoffIter::new(timing);
    let mut attempts = 0;
    let mut last = None;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(RetryError::DeadlineExceeded { attempts, last });
        }

        attempts += 1;
        let budget = timing.attempt_timeout.min(remaining);
        debug!(url, attempt = attempts, ?budget, "sending request");

        let err = match tokio::time::timeout(budget, attempt()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(_) => ApiError::AttemptTimeout {
                url: url.to_owned(),
                timeout: budget,
            },
        };

        if !err.is_retryable() {
            return Err(RetryError::Aborted { err });
        }

        let Some(delay) = backoff.next() else {
            return Err(RetryError::RetryLimitExceeded {
                attempts,
                last: err,
            });
        };

        if Instant::now() + delay >= deadline {
            return Err(RetryError::DeadlineExceeded {
                attempts,
                last: Some(err),
            });
        }

        warn!(
            url,
            attempt = attempts,
            max_attempts = timing.max_attempts,
            "request failed, retrying in {delay:.1?}: {err}"
        );
        last = Some(err);
        tokio::time::sleep(delay).await;
    }
}

/// Yields the delays to wait before each retry.
#[derive(Debug)]
struct BackoffIter {
    initial_delay: Duration,
    max_delay: Option<Duration>,
    jitter: bool,
    current_factor: f64,
    remaining_attempts: u32,
}

impl BackoffIter {
    const BACKOFF_EXPONENT: f64 = 2.;

    fn new(timing: &RequestTiming) -> Self {
        Self {
            initial_delay: timing.initial_delay,
            max_delay: timing.max_delay,
            jitter: timing.jitter,
            current_factor: 1.,
            // The first attempt isn't a retry.
            remaining_attempts: timing.max_attempts.saturating_sub(1),
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.initial_delay.mul_f64(self.current_factor);

        // Stop growing once the delay hits the cap.
        if let Some(max_delay) = self.max_delay
            && delay > max_delay
        {
            return max_delay;
        }

        self.current_factor *= Self::BACKOFF_EXPONENT;
        delay
    }

    fn apply_jitter(duration: Duration) -> Duration {
        let jitter: f64 = rand::rng().sample(OpenClosed01);
        // Apply jitter in the range (0.5, 1].
        duration.mul_f64(0.5 + jitter / 2.)
    }
}

impl Iterator for BackoffIter {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining_attempts == 0 {
            return None;
        }
        self.remaining_attempts -= 1;

        let delay = self.next_delay();
        Some(if self.jitter {
            Self::apply_jitter(delay)
        } else {
            delay
        })
    }
}
