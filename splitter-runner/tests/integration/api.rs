// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::Result;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use splitter_runner::{
    errors::ApiError,
    report::{MetadataReport, send_report},
    timeline::Timeline,
};
use std::{collections::BTreeMap, time::Duration};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

#[tokio::test]
async fn file_timings_are_milliseconds() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TIMINGS_PATH))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "spec/a_spec.rb": 1_250,
            "spec/b_spec.rb": 0,
        })))
        .mount(&server)
        .await;

    let client = client(&server);
    let timings = client
        .fetch_file_timings(
            SUITE,
            &files(&["spec/a_spec.rb", "spec/b_spec.rb", "spec/c_spec.rb"]),
            client.timing().phase_deadline(),
        )
        .await?;

    assert_eq!(
        timings,
        BTreeMap::from([
            ("spec/a_spec.rb".to_owned(), Duration::from_millis(1_250)),
            ("spec/b_spec.rb".to_owned(), Duration::ZERO),
        ])
    );
    Ok(())
}

#[tokio::test]
async fn metadata_report_is_posted_once() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(METADATA_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut timeline = Timeline::new();
    timeline.record("test_start");
    timeline.record("test_end");
    let report = MetadataReport::new(
        IDENTIFIER,
        "0.3.0",
        BTreeMap::from([("BUILDKITE_SPLITTER_RETRY_COUNT".to_owned(), "2".to_owned())]),
        &timeline,
    );

    let client = client(&server);
    let err = client
        .post_metadata(SUITE, &report)
        .await
        .expect_err("server error is returned");
    assert!(matches!(err, ApiError::Server { .. }), "{err:?}");

    // Neither call retries, and `send_report` only logs the failure.
    send_report(&client, SUITE, &report).await;

    let requests = server
        .received_requests()
        .await
        .expect("request recording is enabled");
    assert_eq!(requests.len(), 2);

    let body: Value = requests[0].body_json()?;
    assert_eq!(body["identifier"], IDENTIFIER);
    assert_eq!(body["version"], "0.3.0");
    assert_eq!(body["env"]["BUILDKITE_SPLITTER_RETRY_COUNT"], "2");
    let events: Vec<&str> = body["timeline"]
        .as_array()
        .expect("timeline is an array")
        .iter()
        .filter_map(|entry| entry["event"].as_str())
        .collect();
    assert_eq!(events, ["test_start", "test_end"]);
    let timestamp = body["timeline"][0]["timestamp"]
        .as_str()
        .expect("timestamp is a string");
    assert!(
        chrono::DateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.9f%:z").is_ok(),
        "timestamp {timestamp} has nanosecond precision and an offset"
    );
    Ok(())
}
