//! Record storage: one JSON document per calendar date.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::types::PromotionRecord;
use crate::io::blob::BlobRecordStore;
use crate::io::record_codec::{decode_record, encode_record};
use crate::io::secrets::EnvSecret;

/// Durable storage for promotion records keyed by `YYYY-MM-DD`.
pub trait RecordStore {
    /// Load the record for `key`, or `None` if it was never written.
    fn load(&self, key: &str) -> Result<Option<PromotionRecord>>;
    /// Replace the record for `key`.
    fn save(&self, key: &str, record: &PromotionRecord) -> Result<()>;
}

/// Stores records as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FsRecordStore {
    dir: PathBuf,
}

impl FsRecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl RecordStore for FsRecordStore {
    fn load(&self, key: &str) -> Result<Option<PromotionRecord>> {
        let path = self.path_for(key);
        if !path.exists() {
            debug!(path = %path.display(), "record not found");
            return Ok(None);
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read record {}", path.display()))?;
        let record =
            decode_record(&contents).with_context(|| format!("decode record {}", path.display()))?;
        debug!(path = %path.display(), state = %record.state, "record loaded");
        Ok(Some(record))
    }

    fn save(&self, key: &str, record: &PromotionRecord) -> Result<()> {
        let path = self.path_for(key);
        debug!(path = %path.display(), state = %record.state, "writing record");
        let buf = encode_record(record)?;
        write_atomic(&path, &buf)
    }
}

/// Store selected by configuration.
pub enum ConfiguredStore {
    Fs(FsRecordStore),
    Blob(BlobRecordStore<EnvSecret>),
}

impl RecordStore for ConfiguredStore {
    fn load(&self, key: &str) -> Result<Option<PromotionRecord>> {
        match self {
            ConfiguredStore::Fs(store) => store.load(key),
            ConfiguredStore::Blob(store) => store.load(key),
        }
    }

    fn save(&self, key: &str, record: &PromotionRecord) -> Result<()> {
        match self {
            ConfiguredStore::Fs(store) => store.save(key, record),
            ConfiguredStore::Blob(store) => store.save(key, record),
        }
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("record path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp record {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace record {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BuildTracking, State};

    #[test]
    fn missing_record_loads_as_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsRecordStore::new(temp.path());
        assert!(store.load("2024-01-01").expect("load").is_none());
    }

    /// Verifies save → load preserves all fields and creates the directory.
    #[test]
    fn save_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsRecordStore::new(temp.path().join("records"));

        let mut record = PromotionRecord::new("2024-01-01", 7);
        record.state = State::NotStart;
        record.build = Some(BuildTracking {
            id: 42,
            status: None,
            result: None,
            build_number: Some("20240101.1".to_string()),
            retry_count: 1,
        });

        store.save("2024-01-01", &record).expect("save");
        assert!(store.path_for("2024-01-01").exists());
        assert!(!store.path_for("2024-01-01").with_extension("json.tmp").exists());
        let loaded = store.load("2024-01-01").expect("load").expect("present");
        assert_eq!(loaded, record);
    }

    #[test]
    fn corrupt_record_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsRecordStore::new(temp.path());
        fs::write(store.path_for("2024-01-01"), "{not json").expect("write");
        let err = store.load("2024-01-01").unwrap_err();
        assert!(format!("{err:#}").contains("parse record json"));
    }
}
