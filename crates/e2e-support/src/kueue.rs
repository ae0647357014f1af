//! Kueue objects the scenarios submit workloads through.

use std::collections::BTreeMap;

use api_types::ClusterQueue;
use api_types::ClusterQueueSpec;
use api_types::FlavorQuotas;
use api_types::LocalQueue;
use api_types::LocalQueueSpec;
use api_types::ResourceFlavor;
use api_types::ResourceFlavorSpec;
use api_types::ResourceGroup;
use api_types::ResourceQuota;
use api_types::DEFAULT_QUEUE_ANNOTATION;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Api;
use kube::Client;
use kube::ResourceExt;

use crate::accelerator::Accelerator;
use crate::error::SupportResult;
use crate::objects::create_object;
use crate::objects::delete_object;

const CPU: &str = "cpu";
const MEMORY: &str = "memory";

pub fn resource_flavor(spec: ResourceFlavorSpec) -> ResourceFlavor {
    ResourceFlavor {
        metadata: ObjectMeta {
            generate_name: Some("rf-".to_string()),
            ..Default::default()
        },
        spec,
    }
}

/// Quota for one MNIST run: 8 CPUs and 12Gi of memory on `flavor`, plus a
/// single device when `accelerator` is a GPU.
pub fn cluster_queue_spec(flavor: &str, accelerator: Accelerator) -> ClusterQueueSpec {
    let mut covered_resources = vec![CPU.to_string(), MEMORY.to_string()];
    let mut resources = vec![
        ResourceQuota {
            name: CPU.to_string(),
            nominal_quota: Quantity("8".to_string()),
            borrowing_limit: None,
        },
        ResourceQuota {
            name: MEMORY.to_string(),
            nominal_quota: Quantity("12Gi".to_string()),
            borrowing_limit: None,
        },
    ];

    if let Some(gpu) = accelerator.resource_label() {
        covered_resources.push(gpu.to_string());
        resources.push(ResourceQuota {
            name: gpu.to_string(),
            nominal_quota: Quantity("1".to_string()),
            borrowing_limit: None,
        });
    }

    ClusterQueueSpec {
        namespace_selector: Some(LabelSelector::default()),
        resource_groups: vec![ResourceGroup {
            covered_resources,
            flavors: vec![FlavorQuotas {
                name: flavor.to_string(),
                resources,
            }],
        }],
        ..Default::default()
    }
}

pub fn cluster_queue(spec: ClusterQueueSpec) -> ClusterQueue {
    ClusterQueue {
        metadata: ObjectMeta {
            generate_name: Some("cq-".to_string()),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

/// `LocalQueue` in `namespace` feeding `cluster_queue`. A default queue also
/// receives workloads that carry no queue label.
pub fn local_queue(namespace: &str, cluster_queue: &str, default: bool) -> LocalQueue {
    let annotations = default
        .then(|| BTreeMap::from([(DEFAULT_QUEUE_ANNOTATION.to_string(), "true".to_string())]));

    LocalQueue {
        metadata: ObjectMeta {
            generate_name: Some("lq-".to_string()),
            namespace: Some(namespace.to_string()),
            annotations,
            ..Default::default()
        },
        spec: LocalQueueSpec {
            cluster_queue: cluster_queue.to_string(),
        },
        status: None,
    }
}

pub async fn create_resource_flavor(
    client: &Client,
    spec: ResourceFlavorSpec,
) -> SupportResult<ResourceFlavor> {
    create_object(&Api::all(client.clone()), &resource_flavor(spec)).await
}

pub async fn create_cluster_queue(
    client: &Client,
    spec: ClusterQueueSpec,
) -> SupportResult<ClusterQueue> {
    create_object(&Api::all(client.clone()), &cluster_queue(spec)).await
}

pub async fn create_local_queue(
    client: &Client,
    namespace: &str,
    cluster_queue: &ClusterQueue,
    default: bool,
) -> SupportResult<LocalQueue> {
    let queue = local_queue(namespace, &cluster_queue.name_any(), default);
    create_object(&Api::namespaced(client.clone(), namespace), &queue).await
}

pub async fn delete_resource_flavor(client: &Client, name: &str) -> SupportResult<()> {
    delete_object(&Api::<ResourceFlavor>::all(client.clone()), name).await
}

pub async fn delete_cluster_queue(client: &Client, name: &str) -> SupportResult<()> {
    delete_object(&Api::<ClusterQueue>::all(client.clone()), name).await
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use similar_asserts::assert_eq;
    use test_log::test;
    use wiremock::matchers::body_partial_json;
    use wiremock::matchers::method;
    use wiremock::matchers::path;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;

    use super::*;
    use crate::testing::mock_client;

    fn quota_names(spec: &ClusterQueueSpec) -> Vec<(&str, &str)> {
        spec.resource_groups[0].flavors[0]
            .resources
            .iter()
            .map(|quota| (quota.name.as_str(), quota.nominal_quota.0.as_str()))
            .collect()
    }

    #[test]
    fn cpu_cluster_queue_covers_cpu_and_memory() {
        let spec = cluster_queue_spec("rf-abc", Accelerator::Cpu);

        assert_eq!(spec.namespace_selector, Some(LabelSelector::default()));
        assert_eq!(spec.resource_groups.len(), 1);
        assert_eq!(
            spec.resource_groups[0].covered_resources,
            vec!["cpu", "memory"]
        );
        assert_eq!(spec.resource_groups[0].flavors[0].name, "rf-abc");
        assert_eq!(quota_names(&spec), vec![("cpu", "8"), ("memory", "12Gi")]);
    }

    #[test]
    fn gpu_cluster_queue_adds_device_quota() {
        let spec = cluster_queue_spec("rf-abc", Accelerator::Amd);

        assert_eq!(
            spec.resource_groups[0].covered_resources,
            vec!["cpu", "memory", "amd.com/gpu"]
        );
        assert_eq!(
            quota_names(&spec),
            vec![("cpu", "8"), ("memory", "12Gi"), ("amd.com/gpu", "1")]
        );
    }

    #[test]
    fn default_local_queue_is_annotated() {
        let queue = local_queue("test-ns", "cq-xyz", true);
        assert_eq!(queue.spec.cluster_queue, "cq-xyz");
        assert_eq!(queue.metadata.namespace.as_deref(), Some("test-ns"));
        assert_eq!(
            queue.annotations().get(DEFAULT_QUEUE_ANNOTATION).map(String::as_str),
            Some("true")
        );

        let queue = local_queue("test-ns", "cq-xyz", false);
        assert!(queue.metadata.annotations.is_none());
    }

    #[test(tokio::test)]
    async fn create_local_queue_posts_to_namespace() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apis/kueue.x-k8s.io/v1beta1/namespaces/test-ns/localqueues"))
            .and(body_partial_json(json!({
                "metadata": { "generateName": "lq-" },
                "spec": { "clusterQueue": "cq-xyz" }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "apiVersion": "kueue.x-k8s.io/v1beta1",
                "kind": "LocalQueue",
                "metadata": { "name": "lq-7d9f2", "namespace": "test-ns" },
                "spec": { "clusterQueue": "cq-xyz" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cluster_queue = ClusterQueue::new("cq-xyz", ClusterQueueSpec::default());
        let created = create_local_queue(&mock_client(&server), "test-ns", &cluster_queue, true)
            .await
            .unwrap();

        assert_eq!(created.name_any(), "lq-7d9f2");
    }
}
