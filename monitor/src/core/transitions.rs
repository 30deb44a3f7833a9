//! Pure record transitions applied after a successful remote call.
//!
//! Each function takes the loaded record by reference and returns the next
//! value. The engine persists whichever record it ends up holding, so a
//! transition is only applied once the remote call it depends on has succeeded.

use crate::core::dispatch::build_state;
use crate::core::observations::{BuildDetails, BuildSummary, EnvironmentStatus, QueuedBuild};
use crate::core::types::{BuildTracking, PromotionRecord, ReleaseTarget, State};

/// Failed terminal environment statuses reported by the release system.
pub const FAILED_STAGING_STATUSES: [&str; 3] = ["rejected", "canceled", "partiallySucceeded"];
pub const SUCCEEDED_STAGING_STATUS: &str = "succeeded";

/// Record a downstream build queued against `validation`.
///
/// Bumps the retry count, clears stale status/result from a previous attempt and
/// moves to `NotStart`.
pub fn record_queued_build(
    record: &PromotionRecord,
    validation: &BuildSummary,
    queued: &QueuedBuild,
) -> PromotionRecord {
    let mut next = record.clone();
    next.validation.commit_id = validation.source_version.clone();
    next.validation.branch = validation.source_branch.clone();
    next.build = Some(match record.build.as_ref() {
        Some(prev) => BuildTracking {
            id: queued.id,
            status: None,
            result: None,
            build_number: queued.build_number.clone(),
            retry_count: prev.retry_count + 1,
        },
        None => BuildTracking {
            id: queued.id,
            status: None,
            result: None,
            build_number: queued.build_number.clone(),
            retry_count: 1,
        },
    });
    next.state = State::NotStart;
    next
}

/// Copy an observed build status into the record and derive the next state.
///
/// `result` is only recorded once the build has completed. A succeeded build
/// starts tracking the configured release targets.
pub fn record_build_observation(
    record: &PromotionRecord,
    details: &BuildDetails,
    configured: &[ReleaseTarget],
) -> PromotionRecord {
    let mut next = record.clone();
    let state = build_state(&details.status, details.result.as_deref());
    if let Some(build) = next.build.as_mut() {
        build.status = Some(details.status.clone());
        if state != State::BuildInProgress {
            build.result = details.result.clone();
        }
        if build.build_number.is_none() {
            build.build_number = details.build_number.clone();
        }
    }
    next.state = state;
    if state == State::BuildSucceeded {
        next = seed_releases(&next, configured);
    }
    next
}

/// Track the configured release targets while no release has been created.
///
/// Once any target carries a release id the recorded targets are kept, so a
/// configuration change never drops a created release.
pub fn seed_releases(record: &PromotionRecord, configured: &[ReleaseTarget]) -> PromotionRecord {
    let mut next = record.clone();
    if next.releases.iter().all(|target| target.release_id.is_none()) {
        next.releases = configured.to_vec();
    }
    next
}

/// Copy environment statuses into stagings whose names match (ASCII case-insensitive).
///
/// Stagings with no matching environment keep their previous status.
pub fn apply_environment_statuses(target: &mut ReleaseTarget, environments: &[EnvironmentStatus]) {
    for staging in &mut target.stagings {
        if let Some(env) = environments
            .iter()
            .find(|env| env.name.eq_ignore_ascii_case(&staging.name))
        {
            staging.status = Some(env.status.clone());
        }
    }
}

/// Decide whether the release phase is finished.
///
/// - any staging in a failed terminal status → `ReleaseFailed`
/// - every target has a release and at least one staging, all `succeeded` →
///   `ReleaseSucceeded`
/// - otherwise → `ReleaseInProgress`
pub fn release_outcome(targets: &[ReleaseTarget]) -> State {
    let failed = targets
        .iter()
        .flat_map(|target| target.stagings.iter())
        .filter_map(|staging| staging.status.as_deref())
        .any(|status| {
            FAILED_STAGING_STATUSES
                .iter()
                .any(|failed| failed.eq_ignore_ascii_case(status))
        });
    if failed {
        return State::ReleaseFailed;
    }

    let target_succeeded = |target: &ReleaseTarget| {
        target.release_id.is_some()
            && !target.stagings.is_empty()
            && target.stagings.iter().all(|staging| {
                staging
                    .status
                    .as_deref()
                    .is_some_and(|status| status.eq_ignore_ascii_case(SUCCEEDED_STAGING_STATUS))
            })
    };
    if !targets.is_empty() && targets.iter().all(target_succeeded) {
        State::ReleaseSucceeded
    } else {
        State::ReleaseInProgress
    }
}
