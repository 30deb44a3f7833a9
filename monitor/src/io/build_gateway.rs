//! Build system abstraction.
//!
//! The [`BuildGateway`] trait decouples the engine from the Azure DevOps REST
//! client. Tests use scripted gateways that return predetermined builds without
//! touching the network.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::core::observations::{BuildDetails, BuildSummary, QueuedBuild};

/// Parameters for queueing a downstream build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRequest {
    pub definition_id: u64,
    /// Branch to build; the gateway picks its default when `None`.
    pub source_branch: Option<String>,
    pub commit_id: String,
    pub variables: BTreeMap<String, String>,
}

pub trait BuildGateway {
    /// Successful builds of `definition_id` finished at or after `min_finish_time`,
    /// most recent first, at most `limit` entries.
    fn find_recent_successful_builds(
        &self,
        definition_id: u64,
        min_finish_time: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<BuildSummary>>;

    fn queue_build(&self, request: &QueueRequest) -> Result<QueuedBuild>;

    fn get_build(&self, id: u64) -> Result<BuildDetails>;
}
