//! Persisted promotion record and its promotion stage.
//!
//! The wire names are stable: records written by earlier deployments must keep
//! loading. Optional fields are omitted when absent so that "unknown" never
//! round-trips as "known-empty".

use std::fmt;

use serde::{Deserialize, Serialize};

/// Promotion stage of a day's record.
///
/// `ReleaseFailed` and `ReleaseSucceeded` are terminal. `BuildFailed` is not: it
/// loops back to a fresh trigger attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum State {
    #[default]
    None,
    NotStart,
    BuildInProgress,
    BuildFailed,
    BuildSucceeded,
    ReleaseInProgress,
    ReleaseFailed,
    ReleaseSucceeded,
}

impl State {
    pub const ALL: [State; 8] = [
        State::None,
        State::NotStart,
        State::BuildInProgress,
        State::BuildFailed,
        State::BuildSucceeded,
        State::ReleaseInProgress,
        State::ReleaseFailed,
        State::ReleaseSucceeded,
    ];

    /// Wire value, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            State::None => "none",
            State::NotStart => "notStart",
            State::BuildInProgress => "buildInProgress",
            State::BuildFailed => "buildFailed",
            State::BuildSucceeded => "buildSucceeded",
            State::ReleaseInProgress => "releaseInProgress",
            State::ReleaseFailed => "releaseFailed",
            State::ReleaseSucceeded => "releaseSucceeded",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, State::ReleaseFailed | State::ReleaseSucceeded)
    }

    /// True once release creation has been attempted for the day.
    pub fn is_release_phase(self) -> bool {
        matches!(
            self,
            State::ReleaseInProgress | State::ReleaseFailed | State::ReleaseSucceeded
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable state for one calendar date (`YYYY-MM-DD`, UTC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionRecord {
    #[serde(rename = "e2e_master_validation")]
    pub validation: ValidationRef,
    #[serde(
        rename = "ev2_aks_build",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub build: Option<BuildTracking>,
    #[serde(
        rename = "ev2_aks_release",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub releases: Vec<ReleaseTarget>,
    pub state: State,
    pub date: String,
}

impl PromotionRecord {
    /// Minimal record for a date that has not been seen yet.
    pub fn new(date: &str, validation_definition_id: u64) -> Self {
        Self {
            validation: ValidationRef {
                id: validation_definition_id,
                commit_id: None,
                branch: None,
            },
            build: None,
            releases: Vec::new(),
            state: State::None,
            date: date.to_string(),
        }
    }
}

/// Upstream validation run the downstream build was queued against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRef {
    /// Validation pipeline definition id.
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// Downstream build tracking block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTracking {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_number: Option<String>,
    /// Number of times a downstream build was queued for this date.
    #[serde(rename = "count", default)]
    pub retry_count: u32,
}

/// One release definition tracked for the day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseTarget {
    pub definition_id: u64,
    pub source_alias: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,
    #[serde(rename = "staging", default, skip_serializing_if = "Vec::is_empty")]
    pub stagings: Vec<Staging>,
}

impl ReleaseTarget {
    /// Target with staging names known in advance and nothing observed yet.
    pub fn seeded<S: AsRef<str>>(definition_id: u64, source_alias: &str, stagings: &[S]) -> Self {
        Self {
            definition_id,
            source_alias: source_alias.to_string(),
            release_id: None,
            release_name: None,
            stagings: stagings
                .iter()
                .map(|name| Staging {
                    name: name.as_ref().to_string(),
                    status: None,
                })
                .collect(),
        }
    }

    /// Identity used to match a tracked target against configuration.
    pub fn identity(&self) -> (u64, &str) {
        (self.definition_id, self.source_alias.as_str())
    }
}

/// Named deployment environment inside a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staging {
    #[serde(rename = "staging_name")]
    pub name: String,
    #[serde(
        rename = "staging_status",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<String>,
}

/// Action the engine takes for a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    TriggerBuild,
    MonitorBuild,
    TriggerRelease,
    MonitorRelease,
    Idle,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::TriggerBuild => "trigger_build",
            Action::MonitorBuild => "monitor_build",
            Action::TriggerRelease => "trigger_release",
            Action::MonitorRelease => "monitor_release",
            Action::Idle => "idle",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
