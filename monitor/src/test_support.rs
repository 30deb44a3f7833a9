//! Test-only doubles for the gateways, the record store and the clock.
//!
//! Scripted gateways pop one queued response per call and fail loudly when a
//! test did not script enough responses.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use crate::core::observations::{
    BuildDetails, BuildSummary, CreatedRelease, EnvironmentStatus, QueuedBuild, ReleaseDetails,
};
use crate::core::types::PromotionRecord;
use crate::io::build_gateway::{BuildGateway, QueueRequest};
use crate::io::config::{MonitorConfig, ReleaseTargetConfig, StorageConfig};
use crate::io::record_codec::{decode_record, encode_record};
use crate::io::release_gateway::{ReleaseGateway, ReleaseRequest};
use crate::io::store::{FsRecordStore, RecordStore};
use crate::looping::Clock;

type Scripted<T> = RefCell<VecDeque<Result<T, String>>>;

fn pop<T>(queue: &Scripted<T>, what: &str) -> Result<T> {
    match queue.borrow_mut().pop_front() {
        Some(Ok(value)) => Ok(value),
        Some(Err(message)) => Err(anyhow!(message)),
        None => Err(anyhow!("no scripted {what} left")),
    }
}

/// Build gateway returning scripted lookups, queue handles and build statuses.
#[derive(Default)]
pub struct ScriptedBuildGateway {
    lookups: Scripted<Vec<BuildSummary>>,
    queued: Scripted<QueuedBuild>,
    builds: Scripted<BuildDetails>,
    /// Every lookup as `(definition_id, min_finish_time, limit)`.
    pub lookup_calls: RefCell<Vec<(u64, DateTime<Utc>, u32)>>,
    pub queue_calls: RefCell<Vec<QueueRequest>>,
    pub get_calls: RefCell<Vec<u64>>,
}

impl ScriptedBuildGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_lookup(&self, builds: Vec<BuildSummary>) {
        self.lookups.borrow_mut().push_back(Ok(builds));
    }

    pub fn push_lookup_error(&self, message: &str) {
        self.lookups.borrow_mut().push_back(Err(message.to_string()));
    }

    pub fn push_queued(&self, id: u64, build_number: &str) {
        self.queued.borrow_mut().push_back(Ok(QueuedBuild {
            id,
            build_number: Some(build_number.to_string()),
        }));
    }

    pub fn push_queue_error(&self, message: &str) {
        self.queued.borrow_mut().push_back(Err(message.to_string()));
    }

    pub fn push_build(&self, status: &str, result: Option<&str>) {
        self.builds.borrow_mut().push_back(Ok(BuildDetails {
            status: status.to_string(),
            result: result.map(str::to_string),
            build_number: None,
        }));
    }

    pub fn push_build_error(&self, message: &str) {
        self.builds.borrow_mut().push_back(Err(message.to_string()));
    }

    pub fn call_count(&self) -> usize {
        self.lookup_calls.borrow().len()
            + self.queue_calls.borrow().len()
            + self.get_calls.borrow().len()
    }
}

impl BuildGateway for ScriptedBuildGateway {
    fn find_recent_successful_builds(
        &self,
        definition_id: u64,
        min_finish_time: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<BuildSummary>> {
        self.lookup_calls
            .borrow_mut()
            .push((definition_id, min_finish_time, limit));
        pop(&self.lookups, "lookup")
    }

    fn queue_build(&self, request: &QueueRequest) -> Result<QueuedBuild> {
        self.queue_calls.borrow_mut().push(request.clone());
        pop(&self.queued, "queued build")
    }

    fn get_build(&self, id: u64) -> Result<BuildDetails> {
        self.get_calls.borrow_mut().push(id);
        pop(&self.builds, "build status")
    }
}

/// Release gateway scripted per release definition (creates) and per release id (reads).
#[derive(Default)]
pub struct ScriptedReleaseGateway {
    creates: RefCell<HashMap<u64, VecDeque<Result<CreatedRelease, String>>>>,
    releases: RefCell<HashMap<u64, VecDeque<Result<ReleaseDetails, String>>>>,
    pub create_calls: RefCell<Vec<ReleaseRequest>>,
    pub get_calls: RefCell<Vec<u64>>,
}

impl ScriptedReleaseGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_created(&self, definition_id: u64, release_id: u64) {
        self.creates
            .borrow_mut()
            .entry(definition_id)
            .or_default()
            .push_back(Ok(CreatedRelease {
                id: release_id,
                name: format!("Release-{release_id}"),
            }));
    }

    pub fn push_create_error(&self, definition_id: u64, message: &str) {
        self.creates
            .borrow_mut()
            .entry(definition_id)
            .or_default()
            .push_back(Err(message.to_string()));
    }

    /// Script one read of `release_id` with `(environment, status)` pairs.
    pub fn push_release(&self, release_id: u64, environments: &[(&str, &str)]) {
        self.releases
            .borrow_mut()
            .entry(release_id)
            .or_default()
            .push_back(Ok(ReleaseDetails {
                environments: environments
                    .iter()
                    .map(|(name, status)| EnvironmentStatus {
                        name: name.to_string(),
                        status: status.to_string(),
                    })
                    .collect(),
            }));
    }

    pub fn push_release_error(&self, release_id: u64, message: &str) {
        self.releases
            .borrow_mut()
            .entry(release_id)
            .or_default()
            .push_back(Err(message.to_string()));
    }

    pub fn call_count(&self) -> usize {
        self.create_calls.borrow().len() + self.get_calls.borrow().len()
    }
}

impl ReleaseGateway for ScriptedReleaseGateway {
    fn create_release(&self, request: &ReleaseRequest) -> Result<CreatedRelease> {
        self.create_calls.borrow_mut().push(request.clone());
        let mut creates = self.creates.borrow_mut();
        let queue = creates.entry(request.definition_id).or_default();
        match queue.pop_front() {
            Some(Ok(created)) => Ok(created),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!(
                "no scripted release for definition {}",
                request.definition_id
            )),
        }
    }

    fn get_release(&self, id: u64) -> Result<ReleaseDetails> {
        self.get_calls.borrow_mut().push(id);
        let mut releases = self.releases.borrow_mut();
        let queue = releases.entry(id).or_default();
        match queue.pop_front() {
            Some(Ok(release)) => Ok(release),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted read for release {id}")),
        }
    }
}

/// In-memory store holding encoded records, so every save goes through the codec.
#[derive(Default)]
pub struct MemoryStore {
    records: RefCell<BTreeMap<String, String>>,
    fail_saves: Cell<bool>,
    fail_loads: Cell<bool>,
    saves: Cell<u32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, record: &PromotionRecord) {
        let encoded = encode_record(record).expect("encode record");
        self.records.borrow_mut().insert(key.to_string(), encoded);
    }

    pub fn get(&self, key: &str) -> Option<PromotionRecord> {
        self.raw(key)
            .map(|raw| decode_record(&raw).expect("decode stored record"))
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.records.borrow().get(key).cloned()
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.set(fail);
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.set(fail);
    }

    pub fn save_count(&self) -> u32 {
        self.saves.get()
    }
}

impl RecordStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<PromotionRecord>> {
        if self.fail_loads.get() {
            return Err(anyhow!("scripted load failure"));
        }
        self.raw(key).map(|raw| decode_record(&raw)).transpose()
    }

    fn save(&self, key: &str, record: &PromotionRecord) -> Result<()> {
        if self.fail_saves.get() {
            return Err(anyhow!("scripted save failure"));
        }
        let encoded = encode_record(record)?;
        self.records.borrow_mut().insert(key.to_string(), encoded);
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }
}

/// Filesystem store inside a temporary directory that lives as long as the value.
pub struct TempRecordStore {
    dir: TempDir,
    store: FsRecordStore,
}

impl TempRecordStore {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let store = FsRecordStore::new(dir.path().join("records"));
        Ok(Self { dir, store })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn fs(&self) -> FsRecordStore {
        self.store.clone()
    }
}

impl RecordStore for TempRecordStore {
    fn load(&self, key: &str) -> Result<Option<PromotionRecord>> {
        self.store.load(key)
    }

    fn save(&self, key: &str, record: &PromotionRecord) -> Result<()> {
        self.store.save(key, record)
    }
}

/// Clock whose `sleep` advances time instead of blocking.
pub struct ManualClock {
    now: Cell<DateTime<Utc>>,
    pub sleeps: RefCell<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Cell::new(now),
            sleeps: RefCell::new(Vec::new()),
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        let step = chrono::Duration::from_std(duration).expect("sleep fits chrono duration");
        self.now.set(self.now.get() + step);
    }
}

/// UTC timestamp helper.
pub fn utc(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .expect("valid timestamp")
}

/// Successful validation build at `commit`.
pub fn validation_build(id: u64, commit: &str) -> BuildSummary {
    BuildSummary {
        id,
        build_number: Some(format!("validation.{id}")),
        source_branch: Some("refs/heads/master".to_string()),
        source_version: Some(commit.to_string()),
        finish_time: None,
    }
}

/// Config with two release targets `(1, "A")` and `(2, "B")`, each with `stage1`.
pub fn test_config() -> MonitorConfig {
    MonitorConfig {
        organization: "contoso".to_string(),
        project: "platform".to_string(),
        validation_definition_id: 11,
        build_definition_id: 22,
        storage: StorageConfig::Fs {
            dir: "records".into(),
        },
        releases: vec![
            ReleaseTargetConfig {
                definition_id: 1,
                source_alias: "A".to_string(),
                stagings: vec!["stage1".to_string()],
            },
            ReleaseTargetConfig {
                definition_id: 2,
                source_alias: "B".to_string(),
                stagings: vec!["stage1".to_string()],
            },
        ],
        ..MonitorConfig::default()
    }
}
