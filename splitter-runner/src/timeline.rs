// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Timestamped markers recorded over the course of a run.
//!
//! The timeline is attached to the metadata report sent at the end of a run.

use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};

/// The format used to serialize timeline timestamps: RFC 3339 with nanosecond precision.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9f%:z";

/// A single marker in a [`Timeline`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TimelineEntry {
    /// The name of the event, e.g. `test_start` or `retry_1_end`.
    pub event: String,

    /// When the event was recorded.
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Local>,
}

fn serialize_timestamp<S>(timestamp: &DateTime<Local>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(&timestamp.format(TIMESTAMP_FORMAT))
}

/// An append-only list of timestamped markers.
#[derive(Clone, Debug, Default)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
}

impl Timeline {
    /// Creates an empty timeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `event` at the current time.
    pub fn record(&mut self, event: impl Into<String>) {
        self.record_at(event, Local::now());
    }

    pub(crate) fn record_at(&mut self, event: impl Into<String>, timestamp: DateTime<Local>) {
        let event = event.into();
        tracing::trace!(%event, "timeline marker");
        self.entries.push(TimelineEntry { event, timestamp });
    }

    /// Returns the recorded entries in the order they were recorded.
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// Returns the names of the recorded events, in order.
    pub fn events(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|entry| entry.event.as_str())
    }

    /// Returns true if an event with this name has been recorded.
    pub fn contains(&self, event: &str) -> bool {
        self.events().any(|recorded| recorded == event)
    }
}
