//! JSON encoding of promotion records with schema validation on decode.

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;

use crate::core::types::PromotionRecord;

pub const RECORD_SCHEMA: &str = include_str!("../../schemas/promotion_record.schema.json");

/// Serialize a record to pretty-printed JSON with trailing newline.
pub fn encode_record(record: &PromotionRecord) -> Result<String> {
    let mut buf = serde_json::to_string_pretty(record).context("serialize record")?;
    buf.push('\n');
    Ok(buf)
}

/// Parse a record, rejecting documents that do not match the record schema.
pub fn decode_record(contents: &str) -> Result<PromotionRecord> {
    let value: Value = serde_json::from_str(contents).context("parse record json")?;
    validate_schema(&value)?;
    serde_json::from_value(value).context("deserialize record")
}

fn validate_schema(record: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(RECORD_SCHEMA).context("parse record schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(record) {
        let messages = compiled
            .iter_errors(record)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "record schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BuildTracking, ReleaseTarget, Staging, State, ValidationRef};

    fn populated_record() -> PromotionRecord {
        PromotionRecord {
            validation: ValidationRef {
                id: 7,
                commit_id: Some("abc123".to_string()),
                branch: Some("refs/heads/master".to_string()),
            },
            build: Some(BuildTracking {
                id: 42,
                status: Some("completed".to_string()),
                result: Some("succeeded".to_string()),
                build_number: Some("20240101.1".to_string()),
                retry_count: 2,
            }),
            releases: vec![
                ReleaseTarget {
                    definition_id: 1,
                    source_alias: "A".to_string(),
                    release_id: Some(500),
                    release_name: Some("Release-500".to_string()),
                    stagings: vec![
                        Staging {
                            name: "stage1".to_string(),
                            status: Some("succeeded".to_string()),
                        },
                        Staging {
                            name: "stage2".to_string(),
                            status: None,
                        },
                    ],
                },
                ReleaseTarget::seeded(2, "B", &["stage1"]),
            ],
            state: State::ReleaseInProgress,
            date: "2024-01-01".to_string(),
        }
    }

    #[test]
    fn populated_record_round_trips() {
        let record = populated_record();
        let decoded = decode_record(&encode_record(&record).expect("encode")).expect("decode");
        assert_eq!(decoded, record);
    }

    /// Absent optionals must stay absent on the wire, not become null or zero.
    #[test]
    fn absent_fields_are_omitted() {
        let record = populated_record();
        let encoded = encode_record(&record).expect("encode");
        let value: Value = serde_json::from_str(&encoded).expect("json");

        let second = &value["ev2_aks_release"][1];
        assert!(second.get("release_id").is_none());
        assert!(second.get("release_name").is_none());
        assert!(second["staging"][0].get("staging_status").is_none());
        assert!(value["ev2_aks_release"][0]["staging"][1]
            .get("staging_status")
            .is_none());
        assert!(!encoded.contains("null"));
    }

    #[test]
    fn decodes_record_written_by_previous_deployment() {
        let raw = r#"{
 "e2e_master_validation": {
  "id": 11,
  "commit_id": "deadbeef",
  "branch": "refs/heads/master"
 },
 "ev2_aks_build": {
  "id": 34898972,
  "status": "inProgress",
  "build_number": "20240101.2",
  "count": 1
 },
 "state": "buildInProgress",
 "date": "2024-01-01"
}"#;
        let record = decode_record(raw).expect("decode");
        assert_eq!(record.state, State::BuildInProgress);
        let build = record.build.expect("build");
        assert_eq!(build.id, 34898972);
        assert_eq!(build.retry_count, 1);
        assert!(build.result.is_none());
        assert!(record.releases.is_empty());
    }

    #[test]
    fn rejects_unknown_state() {
        let raw = r#"{"e2e_master_validation":{"id":1},"state":"paused","date":"2024-01-01"}"#;
        let err = decode_record(raw).unwrap_err();
        assert!(err.to_string().contains("schema validation failed"));
    }

    #[test]
    fn rejects_null_optionals() {
        let raw = r#"{"e2e_master_validation":{"id":1,"commit_id":null},"state":"none","date":"2024-01-01"}"#;
        assert!(decode_record(raw).is_err());
    }
}
