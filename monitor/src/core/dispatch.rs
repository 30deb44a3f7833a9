//! State → action dispatch and build status mapping.

use crate::core::types::{Action, State};

/// Pick the single action a tick performs for `state`.
pub fn action_for(state: State) -> Action {
    match state {
        State::None | State::BuildFailed => Action::TriggerBuild,
        State::NotStart | State::BuildInProgress => Action::MonitorBuild,
        State::BuildSucceeded => Action::TriggerRelease,
        State::ReleaseInProgress => Action::MonitorRelease,
        State::ReleaseFailed | State::ReleaseSucceeded => Action::Idle,
    }
}

/// Map a build's lifecycle status and result to the promotion stage.
///
/// - `completed` + `succeeded` → `BuildSucceeded`
/// - `completed` + anything else (or no result) → `BuildFailed`
/// - any other status → `BuildInProgress`
///
/// Comparison ignores ASCII case.
pub fn build_state(status: &str, result: Option<&str>) -> State {
    if !status.eq_ignore_ascii_case("completed") {
        return State::BuildInProgress;
    }
    match result {
        Some(result) if result.eq_ignore_ascii_case("succeeded") => State::BuildSucceeded,
        _ => State::BuildFailed,
    }
}
