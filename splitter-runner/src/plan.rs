// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Acquiring a test plan for a build.
//!
//! A plan is fetched from the service's cache if one exists, and created otherwise. If the
//! service can't be reached, or answers with the empty sentinel plan, a plan is computed locally
//! with [`create_fallback_plan`]. Callers never see the sentinel plan.

use crate::{
    adapter::RunnerAdapter,
    api::ApiClient,
    errors::{PlanAcquireError, RetryError},
    partition::create_fallback_plan,
};
use splitter_metadata::{
    PlanValidationError, TestCase, TestPlan, TestPlanParams, TestPlanParamsTests,
};
use std::{fmt, num::NonZeroUsize, time::Duration};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What to acquire a plan for.
#[derive(Clone, Debug)]
pub struct PlanRequest<'a> {
    /// The suite being run.
    pub suite_slug: &'a str,

    /// Identifies the build (and step) the plan is for.
    pub identifier: &'a str,

    /// The planning mode sent to the service.
    pub mode: &'a str,

    /// The number of workers.
    pub parallelism: NonZeroUsize,

    /// The test files discovered in the working tree.
    pub files: &'a [String],

    /// If set, files that historically take at least this long are split into examples.
    pub slow_file_threshold: Option<Duration>,
}

/// A plan along with where it came from.
#[derive(Clone, Debug)]
pub struct AcquiredPlan {
    /// The plan. This always has one task per worker.
    pub plan: TestPlan,

    /// Where the plan came from.
    pub source: PlanSource,
}

/// Where an [`AcquiredPlan`] came from.
#[derive(Clone, Debug)]
pub enum PlanSource {
    /// The plan was cached by the service.
    Cached,

    /// The plan was created by the service for this request.
    Created,

    /// The plan was computed locally.
    Fallback(FallbackReason),
}

impl PlanSource {
    /// Returns true if the plan was computed locally.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

impl fmt::Display for PlanSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cached => write!(f, "cached"),
            Self::Created => write!(f, "created"),
            Self::Fallback(_) => write!(f, "fallback"),
        }
    }
}

/// Why a plan was computed locally.
#[derive(Clone, Debug)]
pub enum FallbackReason {
    /// The service answered with the empty sentinel plan.
    SentinelPlan,

    /// The service answered with a plan that doesn't match this build.
    InvalidPlan(PlanValidationError),

    /// The service couldn't be used.
    ServiceUnavailable {
        /// A description of the failure.
        message: String,

        /// The number of attempts made.
        attempts: u32,
    },
}

impl FallbackReason {
    fn unavailable(err: &RetryError) -> Self {
        let mut message = err.to_string();
        let mut source = std::error::Error::source(err);
        while let Some(err) = source {
            message.push_str(": ");
            message.push_str(&err.to_string());
            source = err.source();
        }
        Self::ServiceUnavailable {
            message,
            attempts: err.attempts(),
        }
    }
}

/// Acquires test plans from the plan service.
#[derive(Clone, Copy, Debug)]
pub struct PlanClient<'a> {
    api: &'a ApiClient,
}

impl<'a> PlanClient<'a> {
    /// Creates a new plan client.
    pub fn new(api: &'a ApiClient) -> Self {
        Self { api }
    }

    /// Returns a plan for `request`, fetching a cached plan if there is one and creating one
    /// otherwise.
    ///
    /// All requests made share one deadline. If the service is unreachable, rejects a request,
    /// or returns the sentinel plan, a fallback plan is returned. An error is only returned for
    /// failures that indicate a local problem.
    pub async fn fetch_or_create<A: RunnerAdapter>(
        &self,
        request: &PlanRequest<'_>,
        adapter: &A,
    ) -> Result<AcquiredPlan, PlanAcquireError> {
        let deadline = self.api.timing().phase_deadline();
        let parallelism = request.parallelism.get();

        match self
            .api
            .fetch_test_plan(request.suite_slug, request.identifier, deadline)
            .await
        {
            Ok(Some(plan)) => match plan.validate(parallelism) {
                Ok(()) => {
                    info!(tests = plan.test_count(), "using cached test plan");
                    return Ok(AcquiredPlan {
                        plan,
                        source: PlanSource::Cached,
                    });
                }
                Err(PlanValidationError::Sentinel) => {
                    debug!("cached test plan is empty, creating a new plan");
                }
                Err(err) => {
                    warn!("ignoring cached test plan: {err}");
                }
            },
            Ok(None) => debug!("no cached test plan, creating a new plan"),
            Err(err) if err.should_fall_back() => {
                return Ok(fallback(request, FallbackReason::unavailable(&err)));
            }
            Err(err) => return Err(PlanAcquireError::Fetch(err)),
        }

        let params = TestPlanParams {
            suite_slug: request.suite_slug.to_owned(),
            mode: request.mode.to_owned(),
            identifier: request.identifier.to_owned(),
            parallelism,
            tests: self.plan_tests(request, adapter, deadline).await,
        };

        match self.api.create_test_plan(&params, deadline).await {
            Ok(plan) => match plan.validate(parallelism) {
                Ok(()) => {
                    info!(tests = plan.test_count(), "created test plan");
                    Ok(AcquiredPlan {
                        plan,
                        source: PlanSource::Created,
                    })
                }
                Err(PlanValidationError::Sentinel) => {
                    Ok(fallback(request, FallbackReason::SentinelPlan))
                }
                Err(err) => Ok(fallback(request, FallbackReason::InvalidPlan(err))),
            },
            Err(err) if err.should_fall_back() => {
                Ok(fallback(request, FallbackReason::unavailable(&err)))
            }
            Err(err) => Err(PlanAcquireError::Create(err)),
        }
    }

    /// Builds the tests sent to the service, splitting slow files into examples if requested.
    ///
    /// Any failure here falls back to sending every file whole.
    async fn plan_tests<A: RunnerAdapter>(
        &self,
        request: &PlanRequest<'_>,
        adapter: &A,
        deadline: Instant,
    ) -> TestPlanParamsTests {
        let whole_files = || TestPlanParamsTests {
            files: file_test_cases(request.files),
            examples: Vec::new(),
        };

        let Some(threshold) = request.slow_file_threshold else {
            return whole_files();
        };
        if request.files.is_empty() {
            return whole_files();
        }

        let timings = match self
            .api
            .fetch_file_timings(request.suite_slug, request.files, deadline)
            .await
        {
            Ok(timings) => timings,
            Err(err) => {
                warn!("not splitting slow files, couldn't fetch file timings: {err}");
                return whole_files();
            }
        };

        let (slow, fast): (Vec<String>, Vec<String>) =
            request.files.iter().cloned().partition(|file| {
                timings
                    .get(file)
                    .is_some_and(|duration| *duration >= threshold)
            });
        if slow.is_empty() {
            debug!("no files are slower than {threshold:?}");
            return whole_files();
        }

        info!(
            count = slow.len(),
            "splitting files slower than {threshold:?} into examples"
        );
        match adapter.get_examples(&slow).await {
            Ok(examples) if !examples.is_empty() => TestPlanParamsTests {
                files: file_test_cases(&fast),
                examples,
            },
            Ok(_) => {
                warn!("no examples found in slow files, not splitting");
                whole_files()
            }
            Err(err) => {
                warn!("not splitting slow files: {err}");
                whole_files()
            }
        }
    }
}

fn file_test_cases(files: &[String]) -> Vec<TestCase> {
    files.iter().map(TestCase::file).collect()
}

fn fallback(request: &PlanRequest<'_>, reason: FallbackReason) -> AcquiredPlan {
    match &reason {
        FallbackReason::SentinelPlan => {
            warn!(
                "Test splitter server returned an error, using fallback mode. \
                 Your build may take longer than usual."
            );
        }
        FallbackReason::InvalidPlan(err) => {
            warn!(
                "Test splitter server returned an unusable plan ({err}), using fallback mode. \
                 Your build may take longer than usual."
            );
        }
        FallbackReason::ServiceUnavailable { message, attempts } => {
            debug!(attempts, "plan service unavailable: {message}");
            warn!(
                "Could not fetch plan from server, using fallback mode. \
                 Your build may take longer than usual."
            );
        }
    }

    AcquiredPlan {
        plan: create_fallback_plan(&file_test_cases(request.files), request.parallelism),
        source: PlanSource::Fallback(reason),
    }
}
