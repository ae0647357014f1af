use k8s_openapi::api::batch::v1::Job;
use kube::Api;
use kube::Client;
use kube::ResourceExt;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::error::SupportResult;
use crate::objects::get_object;
use crate::objects::get_pod_logs;
use crate::objects::get_pods;

pub async fn get_job(client: &Client, namespace: &str, name: &str) -> SupportResult<Job> {
    get_object(&Api::namespaced(client.clone(), namespace), name).await
}

/// After a failed run, report the current state of `job` and the logs of
/// the pods it spawned. Does nothing when the run succeeded.
pub async fn job_troubleshooting(client: &Client, failed: bool, job: &Job) -> SupportResult<()> {
    if !failed {
        return Ok(());
    }

    let namespace = job.namespace().unwrap_or_default();
    let job = get_job(client, &namespace, &job.name_any()).await?;
    let name = job.name_any();
    error!(status = ?job.status, "Job {namespace}/{name} hasn't completed in time");

    let labels = job
        .spec
        .as_ref()
        .and_then(|spec| spec.selector.as_ref())
        .and_then(|selector| selector.match_labels.clone())
        .unwrap_or_default();
    let pods = get_pods(client, &namespace, &labels).await?;

    if pods.is_empty() {
        error!("Job {namespace}/{name} has no pods scheduled");
        return Ok(());
    }

    for pod in &pods {
        info!("Printing Pod {namespace}/{} logs", pod.name_any());
        match get_pod_logs(client, pod, None).await {
            Ok(logs) => info!("{logs}"),
            Err(report) => warn!("Failed to get logs of Pod {namespace}/{}: {report:?}", pod.name_any()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_log::test;
    use wiremock::matchers::method;
    use wiremock::matchers::path;
    use wiremock::matchers::query_param;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;

    use super::*;
    use crate::testing::mock_client;

    fn job() -> serde_json::Value {
        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": { "name": "mnist", "namespace": "test-ns" },
            "spec": {
                "selector": { "matchLabels": { "batch.kubernetes.io/job-name": "mnist" } },
                "template": { "spec": { "containers": [] } }
            },
            "status": { "active": 1 }
        })
    }

    fn typed_job() -> Job {
        serde_json::from_value(job()).unwrap()
    }

    #[test(tokio::test)]
    async fn skipped_when_run_succeeded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        job_troubleshooting(&mock_client(&server), false, &typed_job())
            .await
            .unwrap();
    }

    #[test(tokio::test)]
    async fn prints_logs_of_job_pods() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apis/batch/v1/namespaces/test-ns/jobs/mnist"))
            .respond_with(ResponseTemplate::new(200).set_body_json(job()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/test-ns/pods"))
            .and(query_param("labelSelector", "batch.kubernetes.io/job-name=mnist"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": "v1",
                "kind": "PodList",
                "metadata": {},
                "items": [{ "metadata": { "name": "mnist-abcde", "namespace": "test-ns" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/test-ns/pods/mnist-abcde/log"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Downloading MNIST dataset...\n"))
            .expect(1)
            .mount(&server)
            .await;

        job_troubleshooting(&mock_client(&server), true, &typed_job())
            .await
            .unwrap();
    }

    #[test(tokio::test)]
    async fn tolerates_jobs_without_pods() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apis/batch/v1/namespaces/test-ns/jobs/mnist"))
            .respond_with(ResponseTemplate::new(200).set_body_json(job()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/test-ns/pods"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": "v1",
                "kind": "PodList",
                "metadata": {},
                "items": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        job_troubleshooting(&mock_client(&server), true, &typed_job())
            .await
            .unwrap();
    }
}
