//! Semantic invariants not expressible via JSON Schema.

use chrono::NaiveDate;

use crate::core::types::{PromotionRecord, ReleaseTarget, State};

/// Date format of record keys.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Check record invariants against its store key:
/// - `date` equals `key` and is a valid `YYYY-MM-DD`
/// - `build` is present iff `state != None`
/// - `build.count > 0` when present
/// - no release ids before the release phase
/// - the release phase tracks at least one target
pub fn validate_record(record: &PromotionRecord, key: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if record.date != key {
        errors.push(format!(
            "date '{}' does not match record key '{}'",
            record.date, key
        ));
    }
    if NaiveDate::parse_from_str(&record.date, DATE_FORMAT).is_err() {
        errors.push(format!("date '{}' is not YYYY-MM-DD", record.date));
    }

    match (&record.build, record.state) {
        (Some(_), State::None) => errors.push("build present while state is none".to_string()),
        (None, state) if state != State::None => {
            errors.push(format!("build missing while state is {state}"));
        }
        (Some(build), _) if build.retry_count == 0 => {
            errors.push(format!("build {}: count must be > 0", build.id));
        }
        _ => {}
    }

    if record.state.is_release_phase() {
        if record.releases.is_empty() {
            errors.push(format!("state {} tracks no release targets", record.state));
        }
    } else {
        for target in &record.releases {
            if let Some(id) = target.release_id {
                errors.push(format!(
                    "release {} for definition {} recorded before release phase",
                    id, target.definition_id
                ));
            }
        }
    }

    errors
}

/// Describe how the tracked release targets differ from configuration.
///
/// Only `BuildSucceeded` and `ReleaseInProgress` records are compared; earlier
/// records track nothing yet and terminal records are final. Drift is not a
/// violation: a `BuildSucceeded` record is re-seeded when its releases are
/// created and a `ReleaseInProgress` record keeps watching the releases it
/// already created.
pub fn target_drift(record: &PromotionRecord, configured: &[ReleaseTarget]) -> Option<String> {
    if !matches!(record.state, State::BuildSucceeded | State::ReleaseInProgress) {
        return None;
    }
    let tracked: Vec<(u64, &str)> = record.releases.iter().map(ReleaseTarget::identity).collect();
    let expected: Vec<(u64, &str)> = configured.iter().map(ReleaseTarget::identity).collect();
    if tracked == expected {
        return None;
    }
    Some(format!("tracked releases {tracked:?} differ from configured targets {expected:?}"))
}
