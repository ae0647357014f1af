//! Client for the Ray dashboard job API.

use std::path::Path;
use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;
use url::Url;

use crate::error::SupportError;
use crate::error::SupportResult;

/// Job as reported by `GET /api/jobs/{id}`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RayJobDetails {
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    pub job_id: Option<String>,
    pub submission_id: Option<String>,
    pub status: String,
    pub entrypoint: String,
    pub message: Option<String>,
    pub error_type: Option<String>,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub runtime_env: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RayJobLogs {
    logs: String,
}

#[derive(Debug, Clone)]
pub struct RayClusterClient {
    base: Url,
    http: reqwest::Client,
    bearer_token: Option<String>,
}

impl RayClusterClient {
    /// Client for the dashboard at `base`.
    ///
    /// `bearer_token` is sent on every request when set; OpenShift routes
    /// are fronted by an OAuth proxy that requires it.
    pub fn new(base: Url, bearer_token: Option<String>) -> SupportResult<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .change_context(SupportError::Http {
                message: "failed to build HTTP client".to_string(),
            })?;
        Ok(Self {
            base,
            http,
            bearer_token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> SupportResult<Url> {
        self.base.join(path).change_context(SupportError::Http {
            message: format!("invalid dashboard endpoint {path}"),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> SupportResult<T> {
        let url = self.endpoint(path)?;
        let mut request = self.http.get(url.clone());
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.change_context(SupportError::Http {
            message: format!("GET {url} failed"),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Report::new(SupportError::Http {
                message: format!("GET {url} returned {status}: {body}"),
            }));
        }

        response.json().await.change_context(SupportError::Serialization {
            message: format!("unexpected response body from GET {url}"),
        })
    }

    pub async fn job_details(&self, job_id: &str) -> SupportResult<RayJobDetails> {
        self.get_json(&format!("api/jobs/{job_id}")).await
    }

    pub async fn job_logs(&self, job_id: &str) -> SupportResult<String> {
        let logs: RayJobLogs = self.get_json(&format!("api/jobs/{job_id}/logs")).await?;
        Ok(logs.logs)
    }
}

/// Store the details and driver logs of a Ray job as `ray-job-<id>.log` in
/// `output_dir`, returning the written path.
pub async fn write_ray_job_api_logs(
    client: &RayClusterClient,
    output_dir: &Path,
    job_id: &str,
) -> SupportResult<PathBuf> {
    info!(job_id, "Retrieving Ray job logs");
    let details = client.job_details(job_id).await?;
    let logs = client.job_logs(job_id).await?;

    let details = serde_json::to_string_pretty(&details).change_context(
        SupportError::Serialization {
            message: "failed to render Ray job details".to_string(),
        },
    )?;

    tokio::fs::create_dir_all(output_dir)
        .await
        .change_context(SupportError::Io {
            message: format!("failed to create {}", output_dir.display()),
        })?;

    let path = output_dir.join(format!("ray-job-{job_id}.log"));
    tokio::fs::write(&path, format!("{details}\n\n{logs}"))
        .await
        .change_context(SupportError::Io {
            message: format!("failed to write {}", path.display()),
        })?;

    info!(path = %path.display(), "Stored Ray job logs");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use similar_asserts::assert_eq;
    use test_log::test;
    use wiremock::matchers::header;
    use wiremock::matchers::method;
    use wiremock::matchers::path;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;

    use super::*;

    const JOB_ID: &str = "rayjob-mnist-x8k2q";

    async fn dashboard() -> (MockServer, RayClusterClient) {
        let server = MockServer::start().await;
        let client = RayClusterClient::new(
            Url::parse(&server.uri()).unwrap(),
            Some("sha256~token".to_string()),
        )
        .unwrap();
        (server, client)
    }

    async fn mount_job(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path(format!("/api/jobs/{JOB_ID}")))
            .and(header("authorization", "Bearer sha256~token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "SUBMISSION",
                "job_id": "02000000",
                "submission_id": JOB_ID,
                "status": "SUCCEEDED",
                "entrypoint": "python /home/ray/jobs/mnist.py",
                "message": "Job finished successfully.",
                "start_time": 1_700_000_000_000_u64,
                "end_time": 1_700_000_300_000_u64,
                "driver_info": { "id": "02000000" }
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/api/jobs/{JOB_ID}/logs")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "logs": "Epoch 2: 100%|██████████| val_acc=0.93\n"
            })))
            .mount(server)
            .await;
    }

    #[test(tokio::test)]
    async fn fetches_job_details_with_token() {
        let (server, client) = dashboard().await;
        mount_job(&server).await;

        let details = client.job_details(JOB_ID).await.unwrap();

        assert_eq!(details.status, "SUCCEEDED");
        assert_eq!(details.submission_id.as_deref(), Some(JOB_ID));
        assert_eq!(details.end_time, Some(1_700_000_300_000));
    }

    #[test(tokio::test)]
    async fn error_status_is_reported() {
        let (server, client) = dashboard().await;
        Mock::given(method("GET"))
            .and(path("/api/jobs/missing/logs"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Job missing does not exist"))
            .mount(&server)
            .await;

        let report = client.job_logs("missing").await.unwrap_err();

        assert!(matches!(report.current_context(), SupportError::Http { .. }));
        assert!(report.to_string().contains("404"), "{report:?}");
    }

    #[test(tokio::test)]
    async fn writes_details_and_logs_to_output_dir() {
        let (server, client) = dashboard().await;
        mount_job(&server).await;
        let output = tempfile::tempdir().unwrap();
        let output_dir = output.path().join("mnist");

        let written = write_ray_job_api_logs(&client, &output_dir, JOB_ID)
            .await
            .unwrap();

        assert_eq!(written, output_dir.join(format!("ray-job-{JOB_ID}.log")));
        let content = std::fs::read_to_string(written).unwrap();
        assert!(content.contains("\"status\": \"SUCCEEDED\""));
        assert!(content.ends_with("val_acc=0.93\n"));
    }
}
