//! Azure DevOps Build and Release REST client.
//!
//! Authenticates with a personal access token (basic auth, empty user name).
//! One client implements both [`BuildGateway`] and [`ReleaseGateway`]; the two
//! APIs live on different hosts.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::core::observations::{
    BuildDetails, BuildSummary, CreatedRelease, EnvironmentStatus, QueuedBuild, ReleaseDetails,
};
use crate::io::build_gateway::{BuildGateway, QueueRequest};
use crate::io::release_gateway::{ReleaseGateway, ReleaseRequest};
use crate::io::secrets::SecretProvider;

pub const DEVOPS_API_VERSION: &str = "6.0";
/// Branch used for queued builds when the validation build reports none.
pub const DEFAULT_SOURCE_BRANCH: &str = "refs/heads/master";
const BUILD_HOST: &str = "https://dev.azure.com";
const RELEASE_HOST: &str = "https://vsrm.dev.azure.com";

#[derive(Clone)]
pub struct AzureDevOpsClient<P> {
    http: Client,
    organization: String,
    project: String,
    build_host: String,
    release_host: String,
    pat: P,
}

impl<P: SecretProvider> AzureDevOpsClient<P> {
    pub fn new(organization: &str, project: &str, pat: P, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("build devops http client")?;
        Ok(Self {
            http,
            organization: organization.to_string(),
            project: project.to_string(),
            build_host: BUILD_HOST.to_string(),
            release_host: RELEASE_HOST.to_string(),
            pat,
        })
    }

    /// Override the service hosts (on-prem servers, tests).
    pub fn with_hosts(mut self, build_host: &str, release_host: &str) -> Self {
        self.build_host = build_host.trim_end_matches('/').to_string();
        self.release_host = release_host.trim_end_matches('/').to_string();
        self
    }

    fn build_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}/_apis/build/{}",
            self.build_host, self.organization, self.project, path
        )
    }

    fn release_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}/_apis/release/{}",
            self.release_host, self.organization, self.project, path
        )
    }

    fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder, what: &str) -> Result<T> {
        let pat = self.pat.secret().context("get PAT")?;
        let response = builder
            .basic_auth("", Some(pat))
            .query(&[("api-version", DEVOPS_API_VERSION)])
            .send()
            .with_context(|| what.to_string())?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("{} returned {}: {}", what, status, body);
        }
        response
            .json::<T>()
            .with_context(|| format!("decode {what} response"))
    }
}

/// Extract the numeric build id from a `vstfs:///Build/Build/<id>` uri.
pub fn build_id_from_uri(uri: &str) -> Option<u64> {
    uri.rsplit('/').next()?.parse().ok()
}

impl<P: SecretProvider> BuildGateway for AzureDevOpsClient<P> {
    #[instrument(skip_all, fields(definition_id = definition_id, limit = limit))]
    fn find_recent_successful_builds(
        &self,
        definition_id: u64,
        min_finish_time: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<BuildSummary>> {
        let min_time = min_finish_time.to_rfc3339_opts(SecondsFormat::Secs, true);
        let request = self.http.get(self.build_url("builds")).query(&[
            ("definitions", definition_id.to_string()),
            ("minTime", min_time),
            ("$top", limit.to_string()),
            ("statusFilter", "completed".to_string()),
            ("resultFilter", "succeeded".to_string()),
            ("queryOrder", "finishTimeDescending".to_string()),
        ]);
        let list: WireList<WireBuild> =
            self.send_json(request, &format!("list builds of definition {definition_id}"))?;

        let mut builds: Vec<BuildSummary> = list
            .value
            .into_iter()
            .filter_map(|build| {
                Some(BuildSummary {
                    id: build.id?,
                    build_number: build.build_number,
                    source_branch: build.source_branch,
                    source_version: build.source_version,
                    finish_time: build.finish_time,
                })
            })
            .collect();
        builds.sort_by(|a, b| b.finish_time.cmp(&a.finish_time));
        builds.truncate(limit as usize);
        debug!(count = builds.len(), "listed successful builds");
        Ok(builds)
    }

    #[instrument(
        skip_all,
        fields(definition_id = request.definition_id, commit = %request.commit_id)
    )]
    fn queue_build(&self, request: &QueueRequest) -> Result<QueuedBuild> {
        let body = WireQueueBuild {
            definition: WireDefinitionRef {
                id: request.definition_id,
            },
            source_branch: request
                .source_branch
                .as_deref()
                .unwrap_or(DEFAULT_SOURCE_BRANCH),
            source_version: &request.commit_id,
            parameters: serde_json::to_string(&request.variables)
                .context("encode build variables")?,
        };
        let builder = self.http.post(self.build_url("builds")).json(&body);
        let build: WireBuild = self.send_json(
            builder,
            &format!("queue build of definition {}", request.definition_id),
        )?;

        let id = build
            .id
            .or_else(|| build.uri.as_deref().and_then(build_id_from_uri))
            .ok_or_else(|| anyhow!("queued build response carries no id"))?;
        info!(build_id = id, build_number = ?build.build_number, "build queued");
        Ok(QueuedBuild {
            id,
            build_number: build.build_number,
        })
    }

    #[instrument(skip(self))]
    fn get_build(&self, id: u64) -> Result<BuildDetails> {
        let builder = self.http.get(self.build_url(&format!("builds/{id}")));
        let build: WireBuild = self.send_json(builder, &format!("get build {id}"))?;
        let status = build
            .status
            .ok_or_else(|| anyhow!("build {id} response carries no status"))?;
        Ok(BuildDetails {
            status,
            result: build.result,
            build_number: build.build_number,
        })
    }
}

impl<P: SecretProvider> ReleaseGateway for AzureDevOpsClient<P> {
    #[instrument(
        skip_all,
        fields(definition_id = request.definition_id, alias = %request.source_alias)
    )]
    fn create_release(&self, request: &ReleaseRequest) -> Result<CreatedRelease> {
        let body = WireCreateRelease {
            definition_id: request.definition_id,
            description: &request.description,
            is_draft: false,
            artifacts: vec![WireArtifact {
                alias: &request.source_alias,
                instance_reference: WireInstanceReference {
                    id: request.build_id.to_string(),
                    name: &request.build_number,
                },
            }],
        };
        let builder = self.http.post(self.release_url("releases")).json(&body);
        let release: WireRelease = self.send_json(
            builder,
            &format!("create release of definition {}", request.definition_id),
        )?;
        info!(release_id = release.id, release_name = %release.name, "release created");
        Ok(CreatedRelease {
            id: release.id,
            name: release.name,
        })
    }

    #[instrument(skip(self))]
    fn get_release(&self, id: u64) -> Result<ReleaseDetails> {
        let builder = self.http.get(self.release_url(&format!("releases/{id}")));
        let release: WireRelease = self.send_json(builder, &format!("get release {id}"))?;
        Ok(ReleaseDetails {
            environments: release
                .environments
                .into_iter()
                .map(|env| EnvironmentStatus {
                    name: env.name,
                    status: env.status.unwrap_or_else(|| "undefined".to_string()),
                })
                .collect(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBuild {
    id: Option<u64>,
    build_number: Option<String>,
    status: Option<String>,
    result: Option<String>,
    source_branch: Option<String>,
    source_version: Option<String>,
    uri: Option<String>,
    finish_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct WireDefinitionRef {
    id: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireQueueBuild<'a> {
    definition: WireDefinitionRef,
    source_branch: &'a str,
    source_version: &'a str,
    parameters: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireCreateRelease<'a> {
    definition_id: u64,
    description: &'a str,
    is_draft: bool,
    artifacts: Vec<WireArtifact<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireArtifact<'a> {
    alias: &'a str,
    instance_reference: WireInstanceReference<'a>,
}

#[derive(Debug, Serialize)]
struct WireInstanceReference<'a> {
    id: String,
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct WireRelease {
    id: u64,
    name: String,
    #[serde(default)]
    environments: Vec<WireEnvironment>,
}

#[derive(Debug, Deserialize)]
struct WireEnvironment {
    name: String,
    status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::secrets::StaticSecret;
    use chrono::TimeZone;
    use mockito::Matcher;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn client(server: &mockito::ServerGuard) -> AzureDevOpsClient<StaticSecret> {
        AzureDevOpsClient::new(
            "org",
            "proj",
            StaticSecret("pat".to_string()),
            Duration::from_secs(5),
        )
        .expect("client")
        .with_hosts(&server.url(), &server.url())
    }

    #[test]
    fn build_id_parsed_from_uri() {
        assert_eq!(build_id_from_uri("vstfs:///Build/Build/34898972"), Some(34898972));
        assert_eq!(build_id_from_uri("vstfs:///Build/Build/"), None);
    }

    #[test]
    fn lists_successful_builds_most_recent_first() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/org/proj/_apis/build/builds")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("definitions".into(), "11".into()),
                Matcher::UrlEncoded("minTime".into(), "2024-01-01T00:00:00Z".into()),
                Matcher::UrlEncoded("$top".into(), "10".into()),
                Matcher::UrlEncoded("resultFilter".into(), "succeeded".into()),
                Matcher::UrlEncoded("api-version".into(), DEVOPS_API_VERSION.into()),
            ]))
            // base64(":pat")
            .match_header("authorization", "Basic OnBhdA==")
            .with_status(200)
            .with_body(
                json!({
                    "count": 2,
                    "value": [
                        {"id": 1, "buildNumber": "old", "finishTime": "2024-01-01T01:00:00Z",
                         "sourceVersion": "aaa", "sourceBranch": "refs/heads/master"},
                        {"id": 2, "buildNumber": "new",
                         "finishTime": "2024-01-01T05:00:00.1234567Z",
                         "sourceVersion": "bbb", "sourceBranch": "refs/heads/master"}
                    ]
                })
                .to_string(),
            )
            .create();

        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("time");
        let builds = client(&server)
            .find_recent_successful_builds(11, since, 10)
            .expect("list");
        mock.assert();
        assert_eq!(builds.len(), 2);
        assert_eq!(builds[0].id, 2);
        assert_eq!(builds[0].source_version.as_deref(), Some("bbb"));
    }

    #[test]
    fn queue_build_falls_back_to_uri_id() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/org/proj/_apis/build/builds")
            .match_query(Matcher::UrlEncoded(
                "api-version".into(),
                DEVOPS_API_VERSION.into(),
            ))
            .match_body(Matcher::PartialJson(json!({
                "definition": {"id": 22},
                "sourceBranch": "refs/heads/master",
                "sourceVersion": "abc123",
                "parameters": "{\"flavor\":\"nightly\"}"
            })))
            .with_status(200)
            .with_body(
                json!({"buildNumber": "20240101.4", "uri": "vstfs:///Build/Build/34898972"})
                    .to_string(),
            )
            .create();

        let mut variables = BTreeMap::new();
        variables.insert("flavor".to_string(), "nightly".to_string());
        let queued = client(&server)
            .queue_build(&QueueRequest {
                definition_id: 22,
                source_branch: None,
                commit_id: "abc123".to_string(),
                variables,
            })
            .expect("queue");
        mock.assert();
        assert_eq!(queued.id, 34898972);
        assert_eq!(queued.build_number.as_deref(), Some("20240101.4"));
    }

    #[test]
    fn get_build_reports_status_and_result() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/org/proj/_apis/build/builds/42")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({"id": 42, "status": "completed", "result": "failed", "buildNumber": "b"})
                    .to_string(),
            )
            .create();

        let details = client(&server).get_build(42).expect("get");
        assert_eq!(details.status, "completed");
        assert_eq!(details.result.as_deref(), Some("failed"));
    }

    #[test]
    fn http_errors_carry_status_and_body() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/org/proj/_apis/build/builds/42")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body("unauthorized")
            .create();

        let err = client(&server).get_build(42).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("get build 42"), "{message}");
        assert!(message.contains("401"), "{message}");
    }

    #[test]
    fn create_release_binds_build_artifact() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/org/proj/_apis/release/releases")
            .match_query(Matcher::Any)
            .match_body(Matcher::PartialJson(json!({
                "definitionId": 1,
                "description": "Daily release: 2024-01-01",
                "artifacts": [
                    {"alias": "A", "instanceReference": {"id": "42", "name": "20240101.1"}}
                ]
            })))
            .with_status(200)
            .with_body(json!({"id": 500, "name": "Release-500"}).to_string())
            .create();

        let created = client(&server)
            .create_release(&ReleaseRequest {
                definition_id: 1,
                source_alias: "A".to_string(),
                build_id: 42,
                build_number: "20240101.1".to_string(),
                description: "Daily release: 2024-01-01".to_string(),
            })
            .expect("create");
        mock.assert();
        assert_eq!(
            created,
            CreatedRelease {
                id: 500,
                name: "Release-500".to_string()
            }
        );
    }

    #[test]
    fn get_release_lists_environment_statuses() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/org/proj/_apis/release/releases/500")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({
                    "id": 500,
                    "name": "Release-500",
                    "environments": [
                        {"name": "stage1", "status": "succeeded"},
                        {"name": "stage2"}
                    ]
                })
                .to_string(),
            )
            .create();

        let release = client(&server).get_release(500).expect("get");
        assert_eq!(
            release.environments,
            vec![
                EnvironmentStatus {
                    name: "stage1".to_string(),
                    status: "succeeded".to_string()
                },
                EnvironmentStatus {
                    name: "stage2".to_string(),
                    status: "undefined".to_string()
                },
            ]
        );
    }
}
