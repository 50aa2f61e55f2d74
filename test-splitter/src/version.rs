// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{fmt::Write, sync::LazyLock};

static VERSION_INFO: VersionInfo = VersionInfo::new();
static LONG_VERSION: LazyLock<String> = LazyLock::new(|| VERSION_INFO.to_long_string());

/// The version string shown by `-V` and sent with the metadata report.
pub(crate) fn short() -> &'static str {
    VERSION_INFO.version
}

/// The version string shown by `--version`.
pub(crate) fn long() -> &'static str {
    &LONG_VERSION
}

struct VersionInfo {
    /// test-splitter's version.
    version: &'static str,

    /// Information about the Git repository test-splitter was built from, if provided at build
    /// time.
    commit_info: Option<CommitInfo>,
}

impl VersionInfo {
    const fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            commit_info: CommitInfo::from_env(),
        }
    }

    fn to_long_string(&self) -> String {
        let mut s = self.version.to_owned();

        if let Some(commit_info) = &self.commit_info {
            _ = write!(
                s,
                " ({} {})",
                commit_info.short_commit_hash, commit_info.commit_date
            );
        }

        _ = write!(s, "\nrelease: {}", self.version);
        if let Some(commit_info) = &self.commit_info {
            _ = write!(s, "\ncommit-hash: {}", commit_info.commit_hash);
            _ = write!(s, "\ncommit-date: {}", commit_info.commit_date);
        }
        _ = write!(
            s,
            "\nos: {} {}",
            std::env::consts::OS,
            std::env::consts::ARCH
        );

        s
    }
}

struct CommitInfo {
    short_commit_hash: &'static str,
    commit_hash: &'static str,
    commit_date: &'static str,
}

impl CommitInfo {
    const fn from_env() -> Option<Self> {
        let Some(short_commit_hash) = option_env!("TEST_SPLITTER_BUILD_COMMIT_SHORT_HASH") else {
            return None;
        };
        let Some(commit_hash) = option_env!("TEST_SPLITTER_BUILD_COMMIT_HASH") else {
            return None;
        };
        let Some(commit_date) = option_env!("TEST_SPLITTER_BUILD_COMMIT_DATE") else {
            return None;
        };

        Some(Self {
            short_commit_hash,
            commit_hash,
            commit_date,
        })
    }
}
