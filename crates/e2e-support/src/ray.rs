//! `RayCluster`/`RayJob` construction and accessors for the MNIST workload.

use std::collections::BTreeMap;

use api_types::ClusterState;
use api_types::HeadGroupSpec;
use api_types::JobStatus;
use api_types::RayCluster;
use api_types::RayClusterSpec;
use api_types::RayJob;
use api_types::RayJobSpec;
use api_types::WorkerGroupSpec;
use api_types::QUEUE_NAME_LABEL;
use api_types::RAY_CLUSTER_SELECTOR_KEY;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::core::v1::ConfigMapVolumeSource;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::ContainerPort;
use k8s_openapi::api::core::v1::ExecAction;
use k8s_openapi::api::core::v1::Lifecycle;
use k8s_openapi::api::core::v1::LifecycleHandler;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::api::core::v1::Toleration;
use k8s_openapi::api::core::v1::Volume;
use k8s_openapi::api::core::v1::VolumeMount;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::ListParams;
use kube::Api;
use kube::Client;
use kube::ResourceExt;
use serde::Serialize;

use crate::accelerator::Accelerator;
use crate::config::TestConfig;
use crate::error::SupportError;
use crate::error::SupportResult;
use crate::objects::create_object;
use crate::objects::delete_object;
use crate::objects::get_object;
use crate::objects::list_objects;

/// Training script mounted into the Ray workers.
pub const MNIST_SCRIPT: &[u8] = include_bytes!("../resources/mnist.py");

pub const MNIST_CONFIG_MAP_NAME: &str = "mnist";
pub const RAY_CLUSTER_NAME: &str = "raycluster";
pub const RAY_JOB_NAME: &str = "mnist";

const JOBS_MOUNT_PATH: &str = "/home/ray/jobs";
const WORKER_GROUP_NAME: &str = "small-group";

const PIP_PACKAGES: [&str; 3] = [
    "pytorch_lightning==2.4.0",
    "torchmetrics==1.6.0",
    "torchvision==0.19.1",
];

const ROCM_PIP_PACKAGES: [&str; 2] = [
    "--extra-index-url https://download.pytorch.org/whl/rocm6.1",
    "torch==2.4.1+rocm6.1",
];

/// Immutable config map carrying the MNIST training script.
pub fn mnist_config_map(namespace: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(MNIST_CONFIG_MAP_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        binary_data: Some(BTreeMap::from([(
            "mnist.py".to_string(),
            ByteString(MNIST_SCRIPT.to_vec()),
        )])),
        immutable: Some(true),
        ..Default::default()
    }
}

/// Inputs of [`ray_cluster`].
#[derive(Debug, Clone)]
pub struct RayClusterParams<'a> {
    pub namespace: &'a str,
    pub local_queue: &'a str,
    /// Config map mounted at `/home/ray/jobs` on the workers.
    pub config_map: &'a str,
    pub accelerator: Accelerator,
    pub image: &'a str,
    pub ray_version: &'a str,
    /// An `AppWrapper` carries the queue label itself, so the cluster must not.
    pub wrapped_in_app_wrapper: bool,
}

fn quantities(entries: &[(&str, &str)]) -> BTreeMap<String, Quantity> {
    entries
        .iter()
        .map(|(name, value)| (name.to_string(), Quantity(value.to_string())))
        .collect()
}

fn ray_stop_on_shutdown() -> Lifecycle {
    Lifecycle {
        pre_stop: Some(LifecycleHandler {
            exec: Some(ExecAction {
                command: Some(vec![
                    "/bin/sh".to_string(),
                    "-c".to_string(),
                    "ray stop".to_string(),
                ]),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        ..Default::default()
    }
}

fn head_group(image: &str) -> HeadGroupSpec {
    HeadGroupSpec {
        ray_start_params: BTreeMap::from([("dashboard-host".to_string(), "0.0.0.0".to_string())]),
        template: PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "ray-head".to_string(),
                    image: Some(image.to_string()),
                    ports: Some(vec![
                        container_port("gcs", 6379),
                        container_port("dashboard", 8265),
                        container_port("client", 10001),
                    ]),
                    lifecycle: Some(ray_stop_on_shutdown()),
                    resources: Some(ResourceRequirements {
                        requests: Some(quantities(&[("cpu", "250m"), ("memory", "2G")])),
                        limits: Some(quantities(&[("cpu", "1"), ("memory", "4G")])),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        },
        service_type: None,
    }
}

fn worker_group(image: &str, config_map: &str, accelerator: Accelerator) -> WorkerGroupSpec {
    let mut requests = quantities(&[("cpu", "250m"), ("memory", "1G")]);
    let mut limits = quantities(&[("cpu", "2"), ("memory", "4G")]);
    let mut tolerations = None;

    if let Some(gpu) = accelerator.resource_label() {
        requests.insert(gpu.to_string(), Quantity("1".to_string()));
        limits.insert(gpu.to_string(), Quantity("1".to_string()));
        tolerations = Some(vec![Toleration {
            key: Some(gpu.to_string()),
            operator: Some("Exists".to_string()),
            ..Default::default()
        }]);
    }

    WorkerGroupSpec {
        group_name: WORKER_GROUP_NAME.to_string(),
        replicas: Some(1),
        min_replicas: Some(1),
        max_replicas: Some(2),
        ray_start_params: BTreeMap::new(),
        template: PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "ray-worker".to_string(),
                    image: Some(image.to_string()),
                    lifecycle: Some(ray_stop_on_shutdown()),
                    resources: Some(ResourceRequirements {
                        requests: Some(requests),
                        limits: Some(limits),
                        ..Default::default()
                    }),
                    volume_mounts: Some(vec![VolumeMount {
                        name: MNIST_CONFIG_MAP_NAME.to_string(),
                        mount_path: JOBS_MOUNT_PATH.to_string(),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                volumes: Some(vec![Volume {
                    name: MNIST_CONFIG_MAP_NAME.to_string(),
                    config_map: Some(ConfigMapVolumeSource {
                        name: Some(config_map.to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                tolerations,
                ..Default::default()
            }),
        },
    }
}

/// One head plus a single small worker group, sized to fit the cluster queue
/// built by [`crate::kueue::cluster_queue_spec`].
pub fn ray_cluster(params: &RayClusterParams<'_>) -> RayCluster {
    let labels = (!params.wrapped_in_app_wrapper).then(|| {
        BTreeMap::from([(QUEUE_NAME_LABEL.to_string(), params.local_queue.to_string())])
    });

    RayCluster {
        metadata: ObjectMeta {
            name: Some(RAY_CLUSTER_NAME.to_string()),
            namespace: Some(params.namespace.to_string()),
            labels,
            ..Default::default()
        },
        spec: RayClusterSpec {
            ray_version: Some(params.ray_version.to_string()),
            head_group_spec: head_group(params.image),
            worker_group_specs: vec![worker_group(
                params.image,
                params.config_map,
                params.accelerator,
            )],
            ..Default::default()
        },
        status: None,
    }
}

#[derive(Serialize)]
struct RuntimeEnv<'a> {
    pip: Vec<&'a str>,
    env_vars: BTreeMap<&'a str, &'a str>,
}

/// Ray runtime environment for the training script, as YAML.
pub fn mnist_runtime_env(accelerator: Accelerator, config: &TestConfig) -> SupportResult<String> {
    let mut pip = PIP_PACKAGES.to_vec();
    if accelerator == Accelerator::Amd {
        pip.extend(ROCM_PIP_PACKAGES);
    }

    let runtime_env = RuntimeEnv {
        pip,
        env_vars: BTreeMap::from([
            ("MNIST_DATASET_URL", config.mnist_dataset_url.as_str()),
            ("PIP_INDEX_URL", config.pip_index_url.as_str()),
            ("PIP_TRUSTED_HOST", config.pip_trusted_host.as_str()),
            ("ACCELERATOR", accelerator.type_name()),
        ]),
    };

    serde_yaml::to_string(&runtime_env).change_context(SupportError::Serialization {
        message: "failed to render Ray runtime environment".to_string(),
    })
}

/// MNIST training job submitted to the existing `cluster`.
pub fn ray_job(
    cluster: &RayCluster,
    accelerator: Accelerator,
    image: &str,
    config: &TestConfig,
) -> SupportResult<RayJob> {
    Ok(RayJob {
        metadata: ObjectMeta {
            name: Some(RAY_JOB_NAME.to_string()),
            namespace: cluster.namespace(),
            ..Default::default()
        },
        spec: RayJobSpec {
            entrypoint: format!("python {JOBS_MOUNT_PATH}/mnist.py"),
            runtime_env_yaml: mnist_runtime_env(accelerator, config)?,
            cluster_selector: BTreeMap::from([(
                RAY_CLUSTER_SELECTOR_KEY.to_string(),
                cluster.name_any(),
            )]),
            shutdown_after_job_finishes: false,
            submitter_pod_template: Some(PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: "rayjob-submitter-pod".to_string(),
                        image: Some(image.to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            }),
            entrypoint_num_cpus: 2.0,
            entrypoint_num_gpus: if accelerator.is_gpu() { 1.0 } else { 0.0 },
            ..Default::default()
        },
        status: None,
    })
}

pub fn ray_cluster_state(cluster: &RayCluster) -> Option<ClusterState> {
    cluster.status.as_ref().and_then(|status| status.state)
}

pub fn ray_job_status(job: &RayJob) -> JobStatus {
    job.status
        .as_ref()
        .map(|status| status.job_status)
        .unwrap_or_default()
}

pub async fn create_ray_cluster(client: &Client, cluster: &RayCluster) -> SupportResult<RayCluster> {
    let namespace = cluster.namespace().unwrap_or_default();
    create_object(&Api::namespaced(client.clone(), &namespace), cluster).await
}

pub async fn get_ray_cluster(client: &Client, namespace: &str, name: &str) -> SupportResult<RayCluster> {
    get_object(&Api::namespaced(client.clone(), namespace), name).await
}

pub async fn get_ray_clusters(client: &Client, namespace: &str) -> SupportResult<Vec<RayCluster>> {
    list_objects(
        &Api::namespaced(client.clone(), namespace),
        &ListParams::default(),
    )
    .await
}

pub async fn delete_ray_cluster(client: &Client, namespace: &str, name: &str) -> SupportResult<()> {
    delete_object(&Api::<RayCluster>::namespaced(client.clone(), namespace), name).await
}

pub async fn create_ray_job(client: &Client, job: &RayJob) -> SupportResult<RayJob> {
    let namespace = job.namespace().unwrap_or_default();
    create_object(&Api::namespaced(client.clone(), &namespace), job).await
}

pub async fn get_ray_job(client: &Client, namespace: &str, name: &str) -> SupportResult<RayJob> {
    get_object(&Api::namespaced(client.clone(), namespace), name).await
}

/// Ray-side submission id of the job, assigned by the operator on submission.
///
/// # Errors
///
/// - [`SupportError::Assertion`] if the operator has not recorded one yet
pub async fn get_ray_job_id(client: &Client, namespace: &str, name: &str) -> SupportResult<String> {
    let job = get_ray_job(client, namespace, name).await?;
    job.status
        .and_then(|status| status.job_id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            Report::new(SupportError::Assertion {
                message: format!("RayJob {namespace}/{name} has no job id in its status"),
            })
        })
}

#[cfg(test)]
mod tests {
    use api_types::RayClusterStatus;
    use api_types::RayJobStatus;
    use clap::Parser;
    use serde_json::json;
    use similar_asserts::assert_eq;
    use test_log::test;
    use wiremock::matchers::method;
    use wiremock::matchers::path;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;

    use super::*;
    use crate::eventually::Eventually;
    use crate::testing::mock_client;

    fn params(accelerator: Accelerator, wrapped: bool) -> RayClusterParams<'static> {
        RayClusterParams {
            namespace: "test-ns",
            local_queue: "lq-abc",
            config_map: MNIST_CONFIG_MAP_NAME,
            accelerator,
            image: "quay.io/modh/ray:test",
            ray_version: "2.35.0",
            wrapped_in_app_wrapper: wrapped,
        }
    }

    fn config() -> TestConfig {
        TestConfig::try_parse_from([
            "e2e",
            "--mnist-dataset-url",
            "https://mirror.local/mnist",
            "--pip-index-url",
            "https://mirror.local/simple",
            "--pip-trusted-host",
            "mirror.local",
        ])
        .unwrap()
    }

    fn worker_pod(cluster: &RayCluster) -> &PodSpec {
        cluster.spec.worker_group_specs[0]
            .template
            .spec
            .as_ref()
            .unwrap()
    }

    #[test]
    fn mnist_config_map_is_immutable_and_carries_script() {
        let config_map = mnist_config_map("test-ns");

        assert_eq!(config_map.name_any(), "mnist");
        assert_eq!(config_map.namespace().as_deref(), Some("test-ns"));
        assert_eq!(config_map.immutable, Some(true));
        let data = config_map.binary_data.unwrap();
        assert_eq!(data["mnist.py"].0, MNIST_SCRIPT);
    }

    #[test]
    fn cpu_cluster_is_queued_and_mounts_script() {
        let cluster = ray_cluster(&params(Accelerator::Cpu, false));

        assert_eq!(cluster.name_any(), RAY_CLUSTER_NAME);
        assert_eq!(
            cluster.labels().get(QUEUE_NAME_LABEL).map(String::as_str),
            Some("lq-abc")
        );
        assert_eq!(cluster.spec.ray_version.as_deref(), Some("2.35.0"));
        assert_eq!(
            cluster.spec.head_group_spec.ray_start_params["dashboard-host"],
            "0.0.0.0"
        );

        let head = &cluster.spec.head_group_spec.template.spec.as_ref().unwrap().containers[0];
        let ports: Vec<_> = head
            .ports
            .iter()
            .flatten()
            .map(|port| (port.name.as_deref().unwrap(), port.container_port))
            .collect();
        assert_eq!(
            ports,
            vec![("gcs", 6379), ("dashboard", 8265), ("client", 10001)]
        );

        let group = &cluster.spec.worker_group_specs[0];
        assert_eq!(group.group_name, "small-group");
        assert_eq!(
            (group.replicas, group.min_replicas, group.max_replicas),
            (Some(1), Some(1), Some(2))
        );

        let worker = worker_pod(&cluster);
        assert!(worker.tolerations.is_none());
        let mounts = worker.containers[0].volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].mount_path, "/home/ray/jobs");
        let volume = &worker.volumes.as_ref().unwrap()[0];
        assert_eq!(
            volume.config_map.as_ref().unwrap().name.as_deref(),
            Some(MNIST_CONFIG_MAP_NAME)
        );
        let limits = worker.containers[0]
            .resources
            .as_ref()
            .unwrap()
            .limits
            .as_ref()
            .unwrap();
        assert_eq!(limits.len(), 2);
    }

    #[test]
    fn wrapped_cluster_has_no_queue_label() {
        let cluster = ray_cluster(&params(Accelerator::Cpu, true));
        assert!(cluster.metadata.labels.is_none());
    }

    #[test]
    fn gpu_cluster_requests_and_tolerates_device() {
        let cluster = ray_cluster(&params(Accelerator::Nvidia, false));
        let worker = worker_pod(&cluster);

        let toleration = &worker.tolerations.as_ref().unwrap()[0];
        assert_eq!(toleration.key.as_deref(), Some("nvidia.com/gpu"));
        assert_eq!(toleration.operator.as_deref(), Some("Exists"));

        let resources = worker.containers[0].resources.as_ref().unwrap();
        let one = Quantity("1".to_string());
        assert_eq!(
            resources.requests.as_ref().unwrap().get("nvidia.com/gpu"),
            Some(&one)
        );
        assert_eq!(
            resources.limits.as_ref().unwrap().get("nvidia.com/gpu"),
            Some(&one)
        );
    }

    #[test]
    fn runtime_env_lists_packages_and_settings() {
        let yaml = mnist_runtime_env(Accelerator::Cpu, &config()).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();

        let pip: Vec<&str> = value["pip"]
            .as_sequence()
            .unwrap()
            .iter()
            .map(|entry| entry.as_str().unwrap())
            .collect();
        assert_eq!(pip, PIP_PACKAGES.to_vec());
        assert_eq!(value["env_vars"]["ACCELERATOR"].as_str(), Some("cpu"));
        assert_eq!(
            value["env_vars"]["MNIST_DATASET_URL"].as_str(),
            Some("https://mirror.local/mnist")
        );
        assert_eq!(
            value["env_vars"]["PIP_TRUSTED_HOST"].as_str(),
            Some("mirror.local")
        );
        assert_eq!(
            value["env_vars"]["PIP_INDEX_URL"].as_str(),
            Some("https://mirror.local/simple")
        );
    }

    #[test]
    fn amd_runtime_env_pulls_rocm_torch() {
        let yaml = mnist_runtime_env(Accelerator::Amd, &config()).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();

        let pip = value["pip"].as_sequence().unwrap();
        assert_eq!(pip.len(), 5);
        assert_eq!(pip[4].as_str(), Some("torch==2.4.1+rocm6.1"));
        assert_eq!(value["env_vars"]["ACCELERATOR"].as_str(), Some("gpu"));
    }

    #[test]
    fn job_targets_cluster_and_sizes_entrypoint() {
        let cluster = ray_cluster(&params(Accelerator::Cpu, false));

        let job = ray_job(&cluster, Accelerator::Cpu, "ray:cpu", &config()).unwrap();
        assert_eq!(job.name_any(), RAY_JOB_NAME);
        assert_eq!(job.namespace().as_deref(), Some("test-ns"));
        assert_eq!(job.spec.entrypoint, "python /home/ray/jobs/mnist.py");
        assert_eq!(
            job.spec.cluster_selector[RAY_CLUSTER_SELECTOR_KEY],
            RAY_CLUSTER_NAME
        );
        assert!(!job.spec.shutdown_after_job_finishes);
        assert_eq!(job.spec.entrypoint_num_cpus, 2.0);
        assert_eq!(job.spec.entrypoint_num_gpus, 0.0);
        let submitter = job.spec.submitter_pod_template.unwrap().spec.unwrap();
        assert_eq!(submitter.restart_policy.as_deref(), Some("Never"));
        assert_eq!(submitter.containers[0].image.as_deref(), Some("ray:cpu"));

        let job = ray_job(&cluster, Accelerator::Nvidia, "ray:cuda", &config()).unwrap();
        assert_eq!(job.spec.entrypoint_num_gpus, 1.0);
    }

    #[test]
    fn status_extractors_default_when_unset() {
        let mut cluster = ray_cluster(&params(Accelerator::Cpu, false));
        assert_eq!(ray_cluster_state(&cluster), None);
        cluster.status = Some(RayClusterStatus {
            state: Some(ClusterState::Ready),
            ..Default::default()
        });
        assert_eq!(ray_cluster_state(&cluster), Some(ClusterState::Ready));

        let mut job = ray_job(&cluster, Accelerator::Cpu, "ray:cpu", &config()).unwrap();
        assert_eq!(ray_job_status(&job), JobStatus::New);
        job.status = Some(RayJobStatus {
            job_status: JobStatus::Running,
            ..Default::default()
        });
        assert_eq!(ray_job_status(&job), JobStatus::Running);
    }

    #[test(tokio::test)]
    async fn waits_for_cluster_to_become_ready() {
        let server = MockServer::start().await;
        let cluster_path = "/apis/ray.io/v1/namespaces/test-ns/rayclusters/raycluster";
        let cluster = |state: Option<&str>| {
            let mut body = json!({
                "apiVersion": "ray.io/v1",
                "kind": "RayCluster",
                "metadata": { "name": "raycluster", "namespace": "test-ns" },
                "spec": {}
            });
            if let Some(state) = state {
                body["status"] = json!({ "state": state });
            }
            body
        };

        Mock::given(method("GET"))
            .and(path(cluster_path))
            .respond_with(ResponseTemplate::new(200).set_body_json(cluster(None)))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(cluster_path))
            .respond_with(ResponseTemplate::new(200).set_body_json(cluster(Some("ready"))))
            .mount(&server)
            .await;

        let client = mock_client(&server);
        let ready = Eventually::new("RayCluster test-ns/raycluster to be ready", || {
            get_ray_cluster(&client, "test-ns", "raycluster")
        })
        .timeout(std::time::Duration::from_secs(10))
        .interval(std::time::Duration::from_millis(10))
        .should(|cluster| ray_cluster_state(cluster) == Some(ClusterState::Ready))
        .await
        .unwrap();

        assert_eq!(ready.name_any(), "raycluster");
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[test(tokio::test)]
    async fn missing_job_id_is_an_assertion_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apis/ray.io/v1/namespaces/test-ns/rayjobs/mnist"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": "ray.io/v1",
                "kind": "RayJob",
                "metadata": { "name": "mnist", "namespace": "test-ns" },
                "spec": { "entrypoint": "python /home/ray/jobs/mnist.py" },
                "status": { "jobStatus": "PENDING" }
            })))
            .mount(&server)
            .await;

        let report = get_ray_job_id(&mock_client(&server), "test-ns", "mnist")
            .await
            .unwrap_err();
        assert!(matches!(
            report.current_context(),
            SupportError::Assertion { .. }
        ));
    }
}
