//! Monitor configuration (TOML).

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use crate::core::types::ReleaseTarget;

/// Monitor configuration, loaded once at startup.
///
/// Identifiers have no usable defaults and are rejected by [`MonitorConfig::validate`]
/// when missing. Tunables default to production values.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Azure DevOps organization.
    pub organization: String,
    /// Azure DevOps project holding both pipelines and the release definitions.
    pub project: String,
    /// Upstream validation pipeline whose success gates the nightly build.
    pub validation_definition_id: u64,
    /// Downstream pipeline queued once validation succeeds.
    pub build_definition_id: u64,
    /// Seconds between ticks.
    pub tick_interval_secs: u64,
    /// How far back to look for a successful validation build.
    pub lookback_hours: u32,
    /// Maximum validation builds fetched per lookback query.
    pub lookback_limit: u32,
    /// Per-request timeout for remote calls.
    pub http_timeout_secs: u64,
    /// Variables passed to every queued downstream build.
    pub build_variables: BTreeMap<String, String>,
    pub storage: StorageConfig,
    pub credentials: CredentialsConfig,
    /// Release definitions fanned out once the downstream build succeeds.
    #[serde(rename = "release")]
    pub releases: Vec<ReleaseTargetConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Azure Blob Storage container; one blob per date.
    Blob { account: String, container: String },
    /// Local directory; one `<date>.json` file per date.
    Fs { dir: PathBuf },
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Environment variable holding the Azure DevOps personal access token.
    pub pat_env: String,
    /// Environment variable holding the storage account shared key.
    pub storage_key_env: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ReleaseTargetConfig {
    pub definition_id: u64,
    pub source_alias: String,
    #[serde(default, alias = "staging")]
    pub stagings: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Fs {
            dir: PathBuf::from(".monitor/records"),
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            pat_env: "PERSONAL_ACCESS_TOKEN".to_string(),
            storage_key_env: "AZURE_STORAGE_ACCESS_KEY".to_string(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            organization: String::new(),
            project: String::new(),
            validation_definition_id: 0,
            build_definition_id: 0,
            tick_interval_secs: 5 * 60,
            lookback_hours: 24,
            lookback_limit: 10,
            http_timeout_secs: 60,
            build_variables: BTreeMap::new(),
            storage: StorageConfig::default(),
            credentials: CredentialsConfig::default(),
            releases: Vec::new(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.organization.trim().is_empty() {
            return Err(anyhow!("organization must be set"));
        }
        if self.project.trim().is_empty() {
            return Err(anyhow!("project must be set"));
        }
        if self.validation_definition_id == 0 {
            return Err(anyhow!("validation_definition_id must be set"));
        }
        if self.build_definition_id == 0 {
            return Err(anyhow!("build_definition_id must be set"));
        }
        if self.tick_interval_secs == 0 {
            return Err(anyhow!("tick_interval_secs must be > 0"));
        }
        if self.lookback_hours == 0 {
            return Err(anyhow!("lookback_hours must be > 0"));
        }
        if self.lookback_limit == 0 {
            return Err(anyhow!("lookback_limit must be > 0"));
        }
        if self.http_timeout_secs == 0 {
            return Err(anyhow!("http_timeout_secs must be > 0"));
        }
        match &self.storage {
            StorageConfig::Blob { account, container } => {
                if account.trim().is_empty() || container.trim().is_empty() {
                    return Err(anyhow!("storage.account and storage.container must be set"));
                }
            }
            StorageConfig::Fs { dir } => {
                if dir.as_os_str().is_empty() {
                    return Err(anyhow!("storage.dir must be set"));
                }
            }
        }
        if self.credentials.pat_env.trim().is_empty() {
            return Err(anyhow!("credentials.pat_env must be set"));
        }
        if self.releases.is_empty() {
            return Err(anyhow!("at least one [[release]] target must be configured"));
        }
        let mut seen = HashSet::new();
        for release in &self.releases {
            if release.definition_id == 0 {
                return Err(anyhow!("release definition_id must be set"));
            }
            if release.source_alias.trim().is_empty() {
                return Err(anyhow!(
                    "release {}: source_alias must be set",
                    release.definition_id
                ));
            }
            if release.stagings.is_empty() {
                return Err(anyhow!(
                    "release {}: at least one staging must be configured",
                    release.definition_id
                ));
            }
            if release.stagings.iter().any(|name| name.trim().is_empty()) {
                return Err(anyhow!(
                    "release {}: staging names must be non-empty",
                    release.definition_id
                ));
            }
            if !seen.insert((release.definition_id, release.source_alias.as_str())) {
                return Err(anyhow!(
                    "release {} with alias '{}' configured twice",
                    release.definition_id,
                    release.source_alias
                ));
            }
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Release targets as tracked by a fresh record, in configuration order.
    pub fn seeded_release_targets(&self) -> Vec<ReleaseTarget> {
        self.releases
            .iter()
            .map(|release| {
                ReleaseTarget::seeded(
                    release.definition_id,
                    &release.source_alias,
                    &release.stagings,
                )
            })
            .collect()
    }
}

/// Parse and validate config from TOML text.
pub fn parse_config(contents: &str) -> Result<MonitorConfig> {
    let cfg: MonitorConfig = toml::from_str(contents).context("parse config toml")?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load config from a TOML file.
pub fn load_config(path: &Path) -> Result<MonitorConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("load {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
organization = "contoso"
project = "platform"
validation_definition_id = 11
build_definition_id = 22

[storage]
kind = "blob"
account = "monitorstate"
container = "nightly"

[[release]]
definition_id = 1
source_alias = "A"
stagings = ["stage1", "stage2"]

[[release]]
definition_id = 2
source_alias = "B"
staging = ["canary"]
"#;

    #[test]
    fn parses_full_config_with_defaults() {
        let cfg = parse_config(FULL).expect("parse");
        assert_eq!(cfg.organization, "contoso");
        assert_eq!(cfg.tick_interval(), Duration::from_secs(300));
        assert_eq!(cfg.lookback_hours, 24);
        assert_eq!(cfg.lookback_limit, 10);
        assert_eq!(cfg.credentials, CredentialsConfig::default());
        assert_eq!(
            cfg.storage,
            StorageConfig::Blob {
                account: "monitorstate".to_string(),
                container: "nightly".to_string()
            }
        );
        assert_eq!(cfg.releases.len(), 2);
        assert_eq!(cfg.releases[1].stagings, vec!["canary".to_string()]);
    }

    #[test]
    fn seeded_targets_follow_configuration_order() {
        let cfg = parse_config(FULL).expect("parse");
        let targets = cfg.seeded_release_targets();
        let identities: Vec<(u64, &str)> = targets.iter().map(ReleaseTarget::identity).collect();
        assert_eq!(identities, vec![(1, "A"), (2, "B")]);
        assert_eq!(targets[0].stagings.len(), 2);
    }

    #[test]
    fn missing_identifiers_are_rejected() {
        let err = parse_config("project = \"p\"").unwrap_err();
        assert!(err.to_string().contains("organization must be set"));

        let no_releases = FULL.split("[[release]]").next().expect("head");
        let err = parse_config(no_releases).unwrap_err();
        assert!(err.to_string().contains("[[release]]"));
    }

    #[test]
    fn duplicate_release_target_is_rejected() {
        let duplicated = format!(
            "{FULL}\n[[release]]\ndefinition_id = 1\nsource_alias = \"A\"\nstagings = [\"s\"]\n"
        );
        let err = parse_config(&duplicated).unwrap_err();
        assert!(err.to_string().contains("configured twice"));
    }

    #[test]
    fn release_without_stagings_is_rejected() {
        let bare = format!("{FULL}\n[[release]]\ndefinition_id = 3\nsource_alias = \"C\"\n");
        let err = parse_config(&bare).unwrap_err();
        assert!(err.to_string().contains("at least one staging"));

        let empty = format!(
            "{FULL}\n[[release]]\ndefinition_id = 3\nsource_alias = \"C\"\nstagings = []\n"
        );
        assert!(parse_config(&empty).is_err());
    }

    #[test]
    fn fs_storage_is_the_default() {
        let without_storage = FULL.replace(
            "[storage]\nkind = \"blob\"\naccount = \"monitorstate\"\ncontainer = \"nightly\"\n",
            "",
        );
        let cfg = parse_config(&without_storage).expect("parse");
        assert_eq!(cfg.storage, StorageConfig::default());
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(load_config(&temp.path().join("missing.toml")).is_err());
    }
}
