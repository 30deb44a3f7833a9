//! Orchestration for a single `monitor tick`.
//!
//! A tick loads (or creates) the record for the current UTC date, dispatches
//! exactly one action on its state and persists the result. When the action
//! fails the previously loaded record is persisted unchanged and the error is
//! returned after the save.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::core::dispatch::action_for;
use crate::core::invariants::{DATE_FORMAT, target_drift, validate_record};
use crate::core::transitions::{
    apply_environment_statuses, record_build_observation, record_queued_build, release_outcome,
    seed_releases,
};
use crate::core::types::{Action, PromotionRecord, State};
use crate::io::build_gateway::{BuildGateway, QueueRequest};
use crate::io::config::MonitorConfig;
use crate::io::release_gateway::{ReleaseGateway, ReleaseRequest};
use crate::io::store::RecordStore;

/// A release target whose remote call failed during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFailure {
    pub definition_id: u64,
    pub source_alias: String,
    pub error: String,
}

/// Result of a single tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    /// Record key (`YYYY-MM-DD`, UTC).
    pub date: String,
    pub action: Action,
    /// State of the record as loaded.
    pub previous: State,
    /// State of the record as persisted.
    pub state: State,
    /// Per-target failures tolerated by the release actions.
    pub target_failures: Vec<TargetFailure>,
}

impl TickOutcome {
    pub fn transitioned(&self) -> bool {
        self.previous != self.state
    }
}

struct ActionReport {
    record: PromotionRecord,
    target_failures: Vec<TargetFailure>,
}

impl ActionReport {
    fn unchanged(record: &PromotionRecord) -> Self {
        Self {
            record: record.clone(),
            target_failures: Vec::new(),
        }
    }

    fn with_record(record: PromotionRecord) -> Self {
        Self {
            record,
            target_failures: Vec::new(),
        }
    }
}

/// Record key for the UTC date of `now`.
pub fn record_key(now: DateTime<Utc>) -> String {
    now.format(DATE_FORMAT).to_string()
}

/// Promotion engine wired to its gateways and record store.
pub struct Engine<B, R, S> {
    config: MonitorConfig,
    builds: B,
    releases: R,
    store: S,
}

impl<B: BuildGateway, R: ReleaseGateway, S: RecordStore> Engine<B, R, S> {
    pub fn new(config: MonitorConfig, builds: B, releases: R, store: S) -> Self {
        Self {
            config,
            builds,
            releases,
            store,
        }
    }

    pub fn builds(&self) -> &B {
        &self.builds
    }

    pub fn releases(&self) -> &R {
        &self.releases
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Advance today's record by at most one action.
    ///
    /// Load failures abort before anything is written. Every other path
    /// persists exactly one record: the next one on success, the loaded one
    /// when the action or the invariant check fails.
    #[instrument(skip_all, fields(date))]
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        let date = record_key(now);
        tracing::Span::current().record("date", date.as_str());

        let loaded = self.load_or_create(&date)?;
        let action = action_for(loaded.state);
        debug!(state = %loaded.state, action = %action, "dispatching");

        if let Some(drift) = target_drift(&loaded, &self.config.seeded_release_targets()) {
            warn!(state = %loaded.state, drift = %drift, "release configuration changed");
        }

        let dispatched = self
            .check_invariants(&date, &loaded)
            .and_then(|()| self.dispatch(action, &loaded, now));

        let (report, action_error) = match dispatched {
            Ok(report) => (report, None),
            Err(err) => {
                warn!(
                    action = %action,
                    error = %format!("{err:#}"),
                    "action failed; keeping record"
                );
                (ActionReport::unchanged(&loaded), Some(err))
            }
        };

        if let Err(err) = self.store.save(&date, &report.record) {
            error!(error = %format!("{err:#}"), "failed to persist record");
            return Err(err.context(format!("persist record {date}")));
        }

        if let Some(err) = action_error {
            return Err(err.context(format!("{action} for {date}")));
        }

        let outcome = TickOutcome {
            date,
            action,
            previous: loaded.state,
            state: report.record.state,
            target_failures: report.target_failures,
        };
        if outcome.transitioned() {
            info!(from = %outcome.previous, to = %outcome.state, "state transition");
        }
        Ok(outcome)
    }

    fn load_or_create(&self, date: &str) -> Result<PromotionRecord> {
        let existing = self
            .store
            .load(date)
            .with_context(|| format!("load record {date}"))?;
        match existing {
            Some(record) => Ok(record),
            None => {
                info!("no record for today; starting a new one");
                Ok(PromotionRecord::new(
                    date,
                    self.config.validation_definition_id,
                ))
            }
        }
    }

    fn check_invariants(&self, date: &str, record: &PromotionRecord) -> Result<()> {
        let violations = validate_record(record, date);
        if violations.is_empty() {
            return Ok(());
        }
        Err(anyhow!(
            "record invariant violation: {}",
            violations.join("; ")
        ))
    }

    fn dispatch(
        &self,
        action: Action,
        record: &PromotionRecord,
        now: DateTime<Utc>,
    ) -> Result<ActionReport> {
        match action {
            Action::TriggerBuild => self.trigger_build(record, now),
            Action::MonitorBuild => self.monitor_build(record),
            Action::TriggerRelease => self.trigger_release(record),
            Action::MonitorRelease => self.monitor_release(record),
            Action::Idle => {
                debug!(state = %record.state, "terminal state; nothing to do");
                Ok(ActionReport::unchanged(record))
            }
        }
    }

    fn trigger_build(&self, record: &PromotionRecord, now: DateTime<Utc>) -> Result<ActionReport> {
        let min_finish_time = now - TimeDelta::hours(i64::from(self.config.lookback_hours));
        let candidates = self
            .builds
            .find_recent_successful_builds(
                self.config.validation_definition_id,
                min_finish_time,
                self.config.lookback_limit,
            )
            .context("look up successful validation builds")?;

        if candidates.is_empty() {
            info!(
                since = %min_finish_time,
                "no successful validation build yet; waiting"
            );
            return Ok(ActionReport::unchanged(record));
        }
        // Newest first; a build without a source version cannot be promoted.
        let Some((validation, commit_id)) = candidates.iter().find_map(|build| {
            build
                .source_version
                .clone()
                .map(|commit_id| (build, commit_id))
        }) else {
            warn!(
                candidates = candidates.len(),
                "no validation build carries a source version; waiting"
            );
            return Ok(ActionReport::unchanged(record));
        };

        let request = QueueRequest {
            definition_id: self.config.build_definition_id,
            source_branch: validation.source_branch.clone(),
            commit_id,
            variables: self.config.build_variables.clone(),
        };
        let queued = self
            .builds
            .queue_build(&request)
            .with_context(|| format!("queue build for commit {}", request.commit_id))?;
        info!(
            validation_build = validation.id,
            validation_number = ?validation.build_number,
            build_id = queued.id,
            commit = %request.commit_id,
            "queued downstream build"
        );

        Ok(ActionReport::with_record(record_queued_build(
            record, validation, &queued,
        )))
    }

    fn monitor_build(&self, record: &PromotionRecord) -> Result<ActionReport> {
        let build = record
            .build
            .as_ref()
            .ok_or_else(|| anyhow!("state {} without a build", record.state))?;
        let details = self
            .builds
            .get_build(build.id)
            .with_context(|| format!("get build {}", build.id))?;
        debug!(
            build_id = build.id,
            status = %details.status,
            result = ?details.result,
            "observed build"
        );
        Ok(ActionReport::with_record(record_build_observation(
            record,
            &details,
            &self.config.seeded_release_targets(),
        )))
    }

    fn trigger_release(&self, record: &PromotionRecord) -> Result<ActionReport> {
        let build = record
            .build
            .as_ref()
            .ok_or_else(|| anyhow!("state {} without a build", record.state))?;
        let build_number = build
            .build_number
            .clone()
            .ok_or_else(|| anyhow!("build {} has no build number", build.id))?;

        let mut next = seed_releases(record, &self.config.seeded_release_targets());
        let description = format!("Daily release: {}", record.date);
        let mut target_failures = Vec::new();

        for target in &mut next.releases {
            if target.release_id.is_some() {
                continue;
            }
            let request = ReleaseRequest {
                definition_id: target.definition_id,
                source_alias: target.source_alias.clone(),
                build_id: build.id,
                build_number: build_number.clone(),
                description: description.clone(),
            };
            match self.releases.create_release(&request) {
                Ok(created) => {
                    info!(
                        definition_id = target.definition_id,
                        release_id = created.id,
                        release = %created.name,
                        "created release"
                    );
                    target.release_id = Some(created.id);
                    target.release_name = Some(created.name);
                }
                Err(err) => {
                    warn!(
                        definition_id = target.definition_id,
                        source_alias = %target.source_alias,
                        error = %format!("{err:#}"),
                        "create release failed"
                    );
                    target_failures.push(TargetFailure {
                        definition_id: target.definition_id,
                        source_alias: target.source_alias.clone(),
                        error: format!("{err:#}"),
                    });
                }
            }
        }

        if !target_failures.is_empty() {
            warn!(
                failed = target_failures.len(),
                "release batch partially failed; failed targets are not retried"
            );
        }
        next.state = State::ReleaseInProgress;
        Ok(ActionReport {
            record: next,
            target_failures,
        })
    }

    fn monitor_release(&self, record: &PromotionRecord) -> Result<ActionReport> {
        let mut next = record.clone();
        let mut target_failures = Vec::new();

        for target in &mut next.releases {
            let Some(release_id) = target.release_id else {
                continue;
            };
            match self.releases.get_release(release_id) {
                Ok(details) => apply_environment_statuses(target, &details.environments),
                Err(err) => {
                    warn!(
                        release_id,
                        definition_id = target.definition_id,
                        error = %format!("{err:#}"),
                        "get release failed"
                    );
                    target_failures.push(TargetFailure {
                        definition_id: target.definition_id,
                        source_alias: target.source_alias.clone(),
                        error: format!("{err:#}"),
                    });
                }
            }
        }

        next.state = release_outcome(&next.releases);
        Ok(ActionReport {
            record: next,
            target_failures,
        })
    }
}
