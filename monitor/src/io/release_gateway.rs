//! Release system abstraction.

use anyhow::Result;

use crate::core::observations::{CreatedRelease, ReleaseDetails};

/// Parameters for creating a release from a finished build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRequest {
    pub definition_id: u64,
    /// Artifact alias the build is bound to in the release definition.
    pub source_alias: String,
    pub build_id: u64,
    pub build_number: String,
    pub description: String,
}

pub trait ReleaseGateway {
    fn create_release(&self, request: &ReleaseRequest) -> Result<CreatedRelease>;

    fn get_release(&self, id: u64) -> Result<ReleaseDetails>;
}
