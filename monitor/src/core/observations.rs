//! Values observed from the build and release systems.
//!
//! Gateways translate vendor payloads into these types; core logic only ever
//! sees these.

use chrono::{DateTime, Utc};

/// A finished validation build returned by a lookback query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    pub id: u64,
    pub build_number: Option<String>,
    pub source_branch: Option<String>,
    pub source_version: Option<String>,
    pub finish_time: Option<DateTime<Utc>>,
}

/// Handle for a build that was just queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedBuild {
    pub id: u64,
    pub build_number: Option<String>,
}

/// Current lifecycle status of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDetails {
    pub status: String,
    pub result: Option<String>,
    pub build_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRelease {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentStatus {
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDetails {
    pub environments: Vec<EnvironmentStatus>,
}
