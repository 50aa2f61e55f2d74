// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The metadata report sent to the plan service at the end of a run.

use crate::{
    api::ApiClient,
    timeline::{Timeline, TimelineEntry},
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Information about a run, sent once it finishes.
#[derive(Clone, Debug, Serialize)]
pub struct MetadataReport {
    /// The build identifier the plan was acquired for.
    pub identifier: String,

    /// The version of test-splitter that ran.
    pub version: String,

    /// A snapshot of the configuration and CI environment.
    pub env: BTreeMap<String, String>,

    /// The markers recorded during the run, in order.
    pub timeline: Vec<TimelineEntry>,
}

impl MetadataReport {
    /// Creates a report from a finished timeline.
    pub fn new(
        identifier: impl Into<String>,
        version: impl Into<String>,
        env: BTreeMap<String, String>,
        timeline: &Timeline,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            version: version.into(),
            env,
            timeline: timeline.entries().to_vec(),
        }
    }
}

/// Sends `report`, logging but otherwise ignoring any failure.
pub async fn send_report(client: &ApiClient, suite_slug: &str, report: &MetadataReport) {
    match client.post_metadata(suite_slug, report).await {
        Ok(()) => debug!("sent metadata report"),
        Err(err) => warn!("failed to send metadata report: {err}"),
    }
}

/// Collects the values of `names` from the environment, skipping unset or non-UTF-8 values.
pub fn env_snapshot<'a>(names: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, String> {
    names
        .into_iter()
        .filter_map(|name| {
            std::env::var(name)
                .ok()
                .map(|value| (name.to_owned(), value))
        })
        .collect()
}
