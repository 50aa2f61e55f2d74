// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client for the test plan service.
//!
//! Every method maps HTTP statuses onto [`ApiError`]. Plan requests go through
//! [`retry`](retry::retry) and share the deadline passed in by the caller; the metadata report
//! is sent once.

mod retry;

pub use retry::RequestTiming;

use crate::{
    diagnostics::Diagnostics,
    errors::{ApiClientBuildError, ApiError, RetryError},
    report::MetadataReport,
};
use reqwest::{
    Method, Response, StatusCode,
    header::{CONTENT_TYPE, HeaderValue},
};
use serde::{Serialize, de::DeserializeOwned};
use splitter_metadata::{TestPlan, TestPlanParams};
use std::{collections::BTreeMap, fmt, time::Duration};
use tokio::time::Instant;
use tracing::debug;
use url::Url;

/// The default base URL of the plan service.
pub const DEFAULT_SERVER_BASE_URL: &str = "https://api.buildkite.com";

/// Configuration for an [`ApiClient`].
#[derive(Clone)]
pub struct ApiClientConfig {
    /// The base URL of the plan service.
    pub server_base_url: String,

    /// The bearer token sent with every request.
    pub access_token: String,

    /// The organization the suite belongs to.
    pub organization_slug: String,

    /// Retry and timeout limits.
    pub timing: RequestTiming,
}

impl fmt::Debug for ApiClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClientConfig")
            .field("server_base_url", &self.server_base_url)
            .field("access_token", &"<redacted>")
            .field("organization_slug", &self.organization_slug)
            .field("timing", &self.timing)
            .finish()
    }
}

/// A client for the test plan service.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: Url,
    access_token: String,
    organization_slug: String,
    timing: RequestTiming,
    diagnostics: Diagnostics,
}

impl ApiClient {
    /// Creates a new client.
    pub fn new(
        config: ApiClientConfig,
        diagnostics: Diagnostics,
    ) -> Result<Self, ApiClientBuildError> {
        let base_url =
            Url::parse(&config.server_base_url).map_err(|err| ApiClientBuildError::InvalidBaseUrl {
                url: config.server_base_url.clone(),
                err,
            })?;
        if base_url.cannot_be_a_base() {
            return Err(ApiClientBuildError::InvalidBaseUrl {
                url: config.server_base_url,
                err: url::ParseError::RelativeUrlWithCannotBeABaseBase,
            });
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("test-splitter/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ApiClientBuildError::Client)?;

        Ok(Self {
            client,
            base_url,
            access_token: config.access_token,
            organization_slug: config.organization_slug,
            timing: config.timing,
            diagnostics,
        })
    }

    /// Returns the retry and timeout limits used by this client.
    pub fn timing(&self) -> &RequestTiming {
        &self.timing
    }

    /// Fetches the cached plan for `identifier`.
    ///
    /// Returns `Ok(None)` if the service has no plan cached. A returned plan may be the empty
    /// sentinel plan.
    pub async fn fetch_test_plan(
        &self,
        suite_slug: &str,
        identifier: &str,
        deadline: Instant,
    ) -> Result<Option<TestPlan>, RetryError> {
        let mut url = self.suite_url(suite_slug, &["test_plan"]);
        url.query_pairs_mut().append_pair("identifier", identifier);
        let url = &url;

        retry::retry(&self.timing, deadline, url.as_str(), || async move {
            let response = self.send(Method::GET, url, None).await?;
            if response.status() == StatusCode::NOT_FOUND {
                debug!(%url, "no cached test plan");
                return Ok(None);
            }
            let response = check_status(url, response)?;
            self.read_json(url, response).await.map(Some)
        })
        .await
    }

    /// Asks the service to create a plan.
    pub async fn create_test_plan(
        &self,
        params: &TestPlanParams,
        deadline: Instant,
    ) -> Result<TestPlan, RetryError> {
        let url = self.endpoint(&["test-splitting", "plan"]);
        self.post_json_with_retry(&url, params, deadline).await
    }

    /// Fetches the historical duration of each of `files`.
    ///
    /// Files the service has no data for are absent from the returned map.
    pub async fn fetch_file_timings(
        &self,
        suite_slug: &str,
        files: &[String],
        deadline: Instant,
    ) -> Result<BTreeMap<String, Duration>, RetryError> {
        #[derive(Serialize)]
        struct FileTimingParams<'a> {
            paths: &'a [String],
        }

        let url = self.suite_url(suite_slug, &["test_files"]);
        let timings: BTreeMap<String, u64> = self
            .post_json_with_retry(&url, &FileTimingParams { paths: files }, deadline)
            .await?;

        Ok(timings
            .into_iter()
            .map(|(path, millis)| (path, Duration::from_millis(millis)))
            .collect())
    }

    /// Sends the metadata report for a run. This is attempted once.
    pub async fn post_metadata(
        &self,
        suite_slug: &str,
        report: &MetadataReport,
    ) -> Result<(), ApiError> {
        let url = self.suite_url(suite_slug, &["test_plan_metadata"]);
        let body = self.encode(&url, report)?;

        let timeout = self.timing.attempt_timeout;
        let response = tokio::time::timeout(timeout, self.send(Method::POST, &url, Some(&body)))
            .await
            .map_err(|_| ApiError::AttemptTimeout {
                url: url.to_string(),
                timeout,
            })??;
        check_status(&url, response)?;
        Ok(())
    }

    async fn post_json_with_retry<B, T>(
        &self,
        url: &Url,
        body: &B,
        deadline: Instant,
    ) -> Result<T, RetryError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let body = self
            .encode(url, body)
            .map_err(|err| RetryError::Aborted { err })?;
        let body = body.as_slice();

        retry::retry(&self.timing, deadline, url.as_str(), || async move {
            let response = self.send(Method::POST, url, Some(body)).await?;
            let response = check_status(url, response)?;
            self.read_json(url, response).await
        })
        .await
    }

    async fn send(
        &self,
        method: Method,
        url: &Url,
        body: Option<&[u8]>,
    ) -> Result<Response, ApiError> {
        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .bearer_auth(&self.access_token)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(body) = body {
            if self.diagnostics.is_debug() {
                debug!(%method, %url, body = %String::from_utf8_lossy(body), "sending request");
            }
            request = request.body(body.to_vec());
        }

        let response = request.send().await.map_err(|err| ApiError::Network {
            url: url.to_string(),
            err,
        })?;
        debug!(%method, %url, status = %response.status(), "received response");
        Ok(response)
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        response: Response,
    ) -> Result<T, ApiError> {
        let bytes = response.bytes().await.map_err(|err| ApiError::Network {
            url: url.to_string(),
            err,
        })?;
        if self.diagnostics.is_debug() {
            debug!(%url, body = %String::from_utf8_lossy(&bytes), "response body");
        }
        serde_json::from_slice(&bytes).map_err(|err| ApiError::Decode {
            url: url.to_string(),
            err,
        })
    }

    fn encode<B: Serialize + ?Sized>(&self, url: &Url, body: &B) -> Result<Vec<u8>, ApiError> {
        serde_json::to_vec(body).map_err(|err| ApiError::Encode {
            url: url.to_string(),
            err,
        })
    }

    fn suite_url(&self, suite_slug: &str, rest: &[&str]) -> Url {
        let mut segments = vec![
            "v2",
            "analytics",
            "organizations",
            self.organization_slug.as_str(),
            "suites",
            suite_slug,
        ];
        segments.extend_from_slice(rest);
        self.endpoint(&segments)
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // The base URL was checked to be a base in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

fn check_status(url: &Url, response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else if status.is_client_error() {
        Err(ApiError::InvalidRequest {
            url: url.to_string(),
            status,
        })
    } else if status.is_server_error() {
        Err(ApiError::Server {
            url: url.to_string(),
            status,
        })
    } else {
        Err(ApiError::UnexpectedStatus {
            url: url.to_string(),
            status,
        })
    }
}
