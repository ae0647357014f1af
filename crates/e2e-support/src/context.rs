//! Per-scenario state: the cluster connection, the run settings and the
//! objects to tear down once the scenario is over.

use std::fmt::Debug;
use std::future::Future;
use std::path::Path;

use api_types::ClusterQueue;
use api_types::ClusterQueueSpec;
use api_types::ResourceFlavor;
use api_types::ResourceFlavorSpec;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::Api;
use kube::Client;
use kube::ResourceExt;
use tracing::info;
use tracing::warn;
use url::Url;

use crate::config::TestConfig;
use crate::dashboard::ray_dashboard_url;
use crate::error::SupportError;
use crate::error::SupportResult;
use crate::error::is_not_found;
use crate::eventually::Eventually;
use crate::kube_client::connect;
use crate::kueue;
use crate::objects::container_names;
use crate::objects::create_object;
use crate::objects::delete_object;
use crate::objects::get_namespace;
use crate::objects::get_pod_logs;
use crate::objects::get_pods;
use crate::objects::test_namespace;
use crate::ray_client::RayClusterClient;
use crate::ray_client::write_ray_job_api_logs;

/// Object removed when the scenario ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cleanup {
    ResourceFlavor(String),
    ClusterQueue(String),
    Namespace(String),
}

pub struct TestContext {
    client: Client,
    config: TestConfig,
    cleanups: Vec<Cleanup>,
}

impl TestContext {
    /// Read the settings from the environment and connect to the cluster.
    pub async fn new() -> SupportResult<Self> {
        let config = TestConfig::from_env()?;
        let client = connect(config.kubeconfig.as_deref()).await?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: TestConfig) -> Self {
        Self {
            client,
            config,
            cleanups: Vec::new(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    /// Poller using the configured interval and the medium timeout.
    pub fn eventually<F, Fut, T>(&self, description: impl Into<String>, fetch: F) -> Eventually<F>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SupportResult<T>>,
        T: Debug,
    {
        Eventually::new(description, fetch)
            .timeout(self.config.timeout_medium)
            .interval(self.config.poll_interval)
    }

    /// Register `cleanup` to run when the scenario ends. Cleanups run in
    /// reverse registration order.
    pub fn defer_cleanup(&mut self, cleanup: Cleanup) {
        self.cleanups.push(cleanup);
    }

    /// Create a namespace deleted at the end of the scenario. Without `name`
    /// a `test-ns-*` name is generated.
    pub async fn new_test_namespace(&mut self, name: Option<&str>) -> SupportResult<Namespace> {
        let namespace = create_object(&Api::all(self.client.clone()), &test_namespace(name)).await?;
        self.defer_cleanup(Cleanup::Namespace(namespace.name_any()));
        Ok(namespace)
    }

    pub async fn create_resource_flavor(&mut self, spec: ResourceFlavorSpec) -> SupportResult<ResourceFlavor> {
        let flavor = kueue::create_resource_flavor(&self.client, spec).await?;
        self.defer_cleanup(Cleanup::ResourceFlavor(flavor.name_any()));
        Ok(flavor)
    }

    pub async fn create_cluster_queue(&mut self, spec: ClusterQueueSpec) -> SupportResult<ClusterQueue> {
        let queue = kueue::create_cluster_queue(&self.client, spec).await?;
        self.defer_cleanup(Cleanup::ClusterQueue(queue.name_any()));
        Ok(queue)
    }

    pub async fn ray_dashboard_url(&self, namespace: &str, cluster: &str) -> SupportResult<Url> {
        ray_dashboard_url(&self.client, &self.config, namespace, cluster).await
    }

    /// Dashboard client authenticated with the configured bearer token.
    pub fn ray_client(&self, dashboard: Url) -> SupportResult<RayClusterClient> {
        RayClusterClient::new(dashboard, self.config.bearer_token.clone())
    }

    /// Store the Ray job details and logs in the output directory. Failures
    /// are logged and otherwise ignored.
    pub async fn write_ray_job_api_logs(&self, client: &RayClusterClient, job_id: &str) {
        if let Err(report) = write_ray_job_api_logs(client, &self.config.output_dir(), job_id).await {
            warn!("Failed to store logs of Ray job {job_id}: {report:?}");
        }
    }

    /// Tear down every registered object, newest first. On failure the pod
    /// logs of the test namespaces are stored first.
    pub async fn cleanup(&mut self, failed: bool) {
        while let Some(cleanup) = self.cleanups.pop() {
            let result = match &cleanup {
                Cleanup::ResourceFlavor(name) => kueue::delete_resource_flavor(&self.client, name).await,
                Cleanup::ClusterQueue(name) => kueue::delete_cluster_queue(&self.client, name).await,
                Cleanup::Namespace(name) => {
                    if failed {
                        self.store_pod_logs(name).await;
                    }
                    self.delete_namespace(name).await
                }
            };
            if let Err(report) = result {
                warn!(?cleanup, "Cleanup failed: {report:?}");
            }
        }
    }

    /// Run the cleanups, then fail the test with `result`'s report if the
    /// scenario failed.
    pub async fn finish(mut self, result: SupportResult<()>) {
        self.cleanup(result.is_err()).await;
        if let Err(report) = result {
            panic!("{report:?}");
        }
    }

    async fn delete_namespace(&self, name: &str) -> SupportResult<()> {
        delete_object(&Api::<Namespace>::all(self.client.clone()), name).await?;
        self.eventually(format!("Namespace {name} to be deleted"), || {
            get_namespace(&self.client, name)
        })
        .should_fail(is_not_found)
        .await
    }

    async fn store_pod_logs(&self, namespace: &str) {
        let directory = self.config.output_dir().join(namespace);
        if let Err(report) = self.try_store_pod_logs(namespace, &directory).await {
            warn!("Failed to store pod logs of namespace {namespace}: {report:?}");
        }
    }

    async fn try_store_pod_logs(&self, namespace: &str, directory: &Path) -> SupportResult<()> {
        let pods = get_pods(&self.client, namespace, &Default::default()).await?;
        tokio::fs::create_dir_all(directory)
            .await
            .change_context(SupportError::Io {
                message: format!("failed to create {}", directory.display()),
            })?;

        for pod in &pods {
            for container in container_names(pod) {
                let logs = match get_pod_logs(&self.client, pod, Some(&container)).await {
                    Ok(logs) => logs,
                    Err(report) => {
                        warn!("No logs for {namespace}/{}/{container}: {report}", pod.name_any());
                        continue;
                    }
                };
                let path = directory.join(format!("{}-{container}.log", pod.name_any()));
                tokio::fs::write(&path, logs)
                    .await
                    .change_context(SupportError::Io {
                        message: format!("failed to write {}", path.display()),
                    })?;
            }
        }

        info!(directory = %directory.display(), pods = pods.len(), "Stored pod logs");
        Ok(())
    }
}
