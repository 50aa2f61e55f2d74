// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, eyre};
use pretty_assertions::assert_eq;
use serde_json::json;
use splitter_metadata::{PlanValidationError, TestCase, TestPlan, TestPlanParams};
use splitter_runner::{
    partition::create_fallback_plan,
    plan::{FallbackReason, PlanClient, PlanRequest, PlanSource},
};
use std::{num::NonZeroUsize, time::Duration};
use wiremock::{
    Mock, MockServer, Request, ResponseTemplate,
    matchers::{header, method, path, query_param},
};

fn request<'a>(files: &'a [String], parallelism: usize) -> PlanRequest<'a> {
    PlanRequest {
        suite_slug: SUITE,
        identifier: IDENTIFIER,
        mode: "static",
        parallelism: NonZeroUsize::new(parallelism).expect("parallelism is non-zero"),
        files,
        slow_file_threshold: None,
    }
}

fn fallback_for(files: &[String], parallelism: usize) -> TestPlan {
    let test_cases: Vec<_> = files.iter().map(TestCase::file).collect();
    create_fallback_plan(
        &test_cases,
        NonZeroUsize::new(parallelism).expect("parallelism is non-zero"),
    )
}

async fn requests_to(server: &MockServer, to: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .expect("request recording is enabled")
        .into_iter()
        .filter(|request| request.url.path() == to)
        .collect()
}

async fn create_params(server: &MockServer) -> Result<TestPlanParams> {
    let requests = requests_to(server, CREATE_PATH).await;
    let [request] = requests.as_slice() else {
        return Err(eyre!("expected one create request, got {}", requests.len()));
    };
    Ok(request.body_json()?)
}

async fn mount_fetch(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(PLAN_PATH))
        .and(query_param("identifier", IDENTIFIER))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(response)
        .mount(server)
        .await;
}

async fn mount_create(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .and(header("content-type", "application/json"))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn cached_plan_skips_creation() -> Result<()> {
    let server = MockServer::start().await;
    mount_fetch(
        &server,
        ResponseTemplate::new(200).set_body_json(plan_json(&[&["b.test.js"], &["a.test.js"]])),
    )
    .await;
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server);
    let files = files(&["a.test.js", "b.test.js"]);
    let acquired = PlanClient::new(&client)
        .fetch_or_create(&request(&files, 2), &ListingAdapter::unsupported())
        .await?;

    assert!(matches!(acquired.source, PlanSource::Cached));
    assert_eq!(
        acquired.plan.task_for(0).map(|task| task.paths()),
        Some(vec!["b.test.js".to_owned()])
    );
    assert_eq!(
        acquired.plan.task_for(1).map(|task| task.paths()),
        Some(vec!["a.test.js".to_owned()])
    );
    Ok(())
}

#[tokio::test]
async fn cache_miss_creates_plan() -> Result<()> {
    let server = MockServer::start().await;
    mount_fetch(&server, ResponseTemplate::new(404)).await;
    mount_create(
        &server,
        ResponseTemplate::new(200).set_body_json(plan_json(&[&["a.test.js", "b.test.js"]])),
    )
    .await;

    let client = client(&server);
    let files = files(&["a.test.js", "b.test.js"]);
    let acquired = PlanClient::new(&client)
        .fetch_or_create(&request(&files, 1), &ListingAdapter::unsupported())
        .await?;

    assert!(matches!(acquired.source, PlanSource::Created));
    assert_eq!(acquired.plan.test_count(), 2);

    let params = create_params(&server).await?;
    assert_eq!(params.suite_slug, SUITE);
    assert_eq!(params.identifier, IDENTIFIER);
    assert_eq!(params.mode, "static");
    assert_eq!(params.parallelism, 1);
    assert_eq!(
        params.tests.files,
        [TestCase::file("a.test.js"), TestCase::file("b.test.js")]
    );
    assert!(params.tests.examples.is_empty());
    Ok(())
}

#[tokio::test]
async fn sentinel_cached_plan_creates_plan() -> Result<()> {
    let server = MockServer::start().await;
    mount_fetch(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "tasks": {} })),
    )
    .await;
    mount_create(
        &server,
        ResponseTemplate::new(200).set_body_json(plan_json(&[&["a.test.js"], &[]])),
    )
    .await;

    let client = client(&server);
    let files = files(&["a.test.js"]);
    let acquired = PlanClient::new(&client)
        .fetch_or_create(&request(&files, 2), &ListingAdapter::unsupported())
        .await?;

    assert!(matches!(acquired.source, PlanSource::Created));
    assert_eq!(requests_to(&server, CREATE_PATH).await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn sentinel_created_plan_matches_fallback() -> Result<()> {
    let server = MockServer::start().await;
    mount_fetch(&server, ResponseTemplate::new(404)).await;
    mount_create(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "tasks": {} })),
    )
    .await;

    let client = client(&server);
    let files = files(&["a", "b", "c", "d", "e"]);
    let acquired = PlanClient::new(&client)
        .fetch_or_create(&request(&files, 3), &ListingAdapter::unsupported())
        .await?;

    assert!(matches!(
        acquired.source,
        PlanSource::Fallback(FallbackReason::SentinelPlan)
    ));
    assert_eq!(acquired.plan, fallback_for(&files, 3));
    Ok(())
}

#[tokio::test]
async fn created_plan_for_wrong_parallelism_falls_back() -> Result<()> {
    let server = MockServer::start().await;
    mount_fetch(&server, ResponseTemplate::new(404)).await;
    mount_create(
        &server,
        ResponseTemplate::new(200).set_body_json(plan_json(&[&["a"], &["b"], &["c"]])),
    )
    .await;

    let client = client(&server);
    let files = files(&["a", "b", "c"]);
    let acquired = PlanClient::new(&client)
        .fetch_or_create(&request(&files, 2), &ListingAdapter::unsupported())
        .await?;

    match acquired.source {
        PlanSource::Fallback(FallbackReason::InvalidPlan(PlanValidationError::NodeMismatch {
            parallelism,
            keys,
        })) => {
            assert_eq!(parallelism, 2);
            assert_eq!(keys, ["0", "1", "2"]);
        }
        other => return Err(eyre!("expected an invalid plan fallback, got {other:?}")),
    }
    assert_eq!(acquired.plan, fallback_for(&files, 2));
    Ok(())
}

#[tokio::test]
async fn single_client_error_falls_back_without_retrying() -> Result<()> {
    let server = MockServer::start().await;
    mount_fetch(&server, ResponseTemplate::new(403)).await;

    let client = client(&server);
    let files = files(&["a", "b"]);
    let acquired = PlanClient::new(&client)
        .fetch_or_create(&request(&files, 2), &ListingAdapter::unsupported())
        .await?;

    match &acquired.source {
        PlanSource::Fallback(FallbackReason::ServiceUnavailable { attempts, .. }) => {
            assert_eq!(*attempts, 1);
        }
        other => return Err(eyre!("expected a service fallback, got {other:?}")),
    }
    assert_eq!(acquired.plan, fallback_for(&files, 2));

    let requests = server
        .received_requests()
        .await
        .expect("request recording is enabled");
    assert_eq!(requests.len(), 1, "exactly one network attempt");
    Ok(())
}

#[tokio::test]
async fn sustained_server_errors_use_every_attempt() -> Result<()> {
    let server = MockServer::start().await;
    mount_fetch(&server, ResponseTemplate::new(503)).await;

    let client = client(&server);
    let files = files(&["a", "b", "c"]);
    let acquired = PlanClient::new(&client)
        .fetch_or_create(&request(&files, 2), &ListingAdapter::unsupported())
        .await?;

    assert!(acquired.source.is_fallback());
    assert_eq!(acquired.plan, fallback_for(&files, 2));
    assert_eq!(requests_to(&server, PLAN_PATH).await.len(), 5);
    assert!(requests_to(&server, CREATE_PATH).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn transient_errors_are_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PLAN_PATH))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_fetch(
        &server,
        ResponseTemplate::new(200).set_body_json(plan_json(&[&["a"]])),
    )
    .await;

    let client = client(&server);
    let files = files(&["a"]);
    let acquired = PlanClient::new(&client)
        .fetch_or_create(&request(&files, 1), &ListingAdapter::unsupported())
        .await?;

    assert!(matches!(acquired.source, PlanSource::Cached));
    assert_eq!(requests_to(&server, PLAN_PATH).await.len(), 3);
    Ok(())
}

#[tokio::test]
async fn malformed_body_is_retried() -> Result<()> {
    let server = MockServer::start().await;
    mount_fetch(&server, ResponseTemplate::new(404)).await;
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_create(
        &server,
        ResponseTemplate::new(200).set_body_json(plan_json(&[&["a"]])),
    )
    .await;

    let client = client(&server);
    let files = files(&["a"]);
    let acquired = PlanClient::new(&client)
        .fetch_or_create(&request(&files, 1), &ListingAdapter::unsupported())
        .await?;

    assert!(matches!(acquired.source, PlanSource::Created));
    assert_eq!(requests_to(&server, CREATE_PATH).await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn create_client_error_falls_back() -> Result<()> {
    let server = MockServer::start().await;
    mount_fetch(&server, ResponseTemplate::new(404)).await;
    mount_create(&server, ResponseTemplate::new(422)).await;

    let client = client(&server);
    let files = files(&["a", "b"]);
    let acquired = PlanClient::new(&client)
        .fetch_or_create(&request(&files, 1), &ListingAdapter::unsupported())
        .await?;

    assert!(acquired.source.is_fallback());
    assert_eq!(acquired.plan, fallback_for(&files, 1));
    assert_eq!(requests_to(&server, CREATE_PATH).await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn unresponsive_service_falls_back_at_deadline() -> Result<()> {
    let server = MockServer::start().await;
    mount_fetch(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(plan_json(&[&["a"]]))
            .set_delay(Duration::from_secs(5)),
    )
    .await;

    let timing = splitter_runner::api::RequestTiming {
        attempt_timeout: Duration::from_millis(100),
        phase_timeout: Duration::from_millis(250),
        ..fast_timing()
    };
    let client = client_with_timing(&server, timing);
    let files = files(&["a", "b"]);

    let start = std::time::Instant::now();
    let acquired = PlanClient::new(&client)
        .fetch_or_create(&request(&files, 2), &ListingAdapter::unsupported())
        .await?;

    assert!(acquired.source.is_fallback());
    assert_eq!(acquired.plan, fallback_for(&files, 2));
    assert!(
        start.elapsed() < Duration::from_secs(3),
        "acquisition is bounded by the phase deadline, took {:?}",
        start.elapsed()
    );
    Ok(())
}

#[tokio::test]
async fn slow_files_are_split_into_examples() -> Result<()> {
    let server = MockServer::start().await;
    mount_fetch(&server, ResponseTemplate::new(404)).await;
    Mock::given(method("POST"))
        .and(path(TIMINGS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "spec/slow_spec.rb": 240_000,
            "spec/fast_spec.rb": 1_500,
        })))
        .mount(&server)
        .await;
    mount_create(
        &server,
        ResponseTemplate::new(200).set_body_json(plan_json(&[&["spec/fast_spec.rb"]])),
    )
    .await;

    let adapter = ListingAdapter::new(vec![
        TestCase::example("./spec/slow_spec.rb[1:1]", "Slow one"),
        TestCase::example("./spec/slow_spec.rb[1:2]", "Slow two"),
    ]);
    let client = client(&server);
    let files = files(&["spec/fast_spec.rb", "spec/slow_spec.rb", "spec/new_spec.rb"]);
    let request = PlanRequest {
        slow_file_threshold: Some(Duration::from_secs(180)),
        ..request(&files, 1)
    };
    PlanClient::new(&client)
        .fetch_or_create(&request, &adapter)
        .await?;

    assert_eq!(adapter.listed(), [vec!["spec/slow_spec.rb".to_owned()]]);

    let timings_request = requests_to(&server, TIMINGS_PATH).await;
    let [timings_request] = timings_request.as_slice() else {
        return Err(eyre!("expected one timings request"));
    };
    assert_eq!(
        timings_request.body_json::<serde_json::Value>()?,
        json!({ "paths": ["spec/fast_spec.rb", "spec/slow_spec.rb", "spec/new_spec.rb"] })
    );

    let params = create_params(&server).await?;
    assert_eq!(
        params.tests.files,
        [
            TestCase::file("spec/fast_spec.rb"),
            TestCase::file("spec/new_spec.rb")
        ]
    );
    assert_eq!(
        params.tests.examples,
        [
            TestCase::example("./spec/slow_spec.rb[1:1]", "Slow one"),
            TestCase::example("./spec/slow_spec.rb[1:2]", "Slow two"),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn missing_timings_keep_whole_files() -> Result<()> {
    let server = MockServer::start().await;
    mount_fetch(&server, ResponseTemplate::new(404)).await;
    Mock::given(method("POST"))
        .and(path(TIMINGS_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    mount_create(
        &server,
        ResponseTemplate::new(200).set_body_json(plan_json(&[&["a_spec.rb"]])),
    )
    .await;

    let adapter = ListingAdapter::new(vec![TestCase::example("x", "y")]);
    let client = client(&server);
    let files = files(&["a_spec.rb"]);
    let request = PlanRequest {
        slow_file_threshold: Some(Duration::from_secs(1)),
        ..request(&files, 1)
    };
    let acquired = PlanClient::new(&client)
        .fetch_or_create(&request, &adapter)
        .await?;

    assert!(matches!(acquired.source, PlanSource::Created));
    assert!(adapter.listed().is_empty());
    let params = create_params(&server).await?;
    assert_eq!(params.tests.files, [TestCase::file("a_spec.rb")]);
    assert!(params.tests.examples.is_empty());
    Ok(())
}

#[tokio::test]
async fn unsupported_example_listing_keeps_whole_files() -> Result<()> {
    let server = MockServer::start().await;
    mount_fetch(&server, ResponseTemplate::new(404)).await;
    Mock::given(method("POST"))
        .and(path(TIMINGS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "a.test.js": 999_999 })))
        .mount(&server)
        .await;
    mount_create(
        &server,
        ResponseTemplate::new(200).set_body_json(plan_json(&[&["a.test.js"]])),
    )
    .await;

    let adapter = ListingAdapter::unsupported();
    let client = client(&server);
    let files = files(&["a.test.js"]);
    let request = PlanRequest {
        slow_file_threshold: Some(Duration::from_secs(1)),
        ..request(&files, 1)
    };
    PlanClient::new(&client)
        .fetch_or_create(&request, &adapter)
        .await?;

    assert_eq!(adapter.listed(), [vec!["a.test.js".to_owned()]]);
    let params = create_params(&server).await?;
    assert_eq!(params.tests.files, [TestCase::file("a.test.js")]);
    assert!(params.tests.examples.is_empty());
    Ok(())
}
