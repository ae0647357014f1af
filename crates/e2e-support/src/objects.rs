//! Accessors for core Kubernetes objects plus the generic create/get/delete
//! helpers the typed accessors in the other modules are built on.

use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DeleteParams;
use kube::api::ListParams;
use kube::api::LogParams;
use kube::api::PostParams;
use kube::Api;
use kube::Client;
use kube::Resource;
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::error::KubeResultExt;
use crate::error::SupportResult;

/// Prefix of generated test namespace names.
pub const TEST_NAMESPACE_PREFIX: &str = "test-ns-";

/// Label put on every namespace created by the test context.
pub const TEST_NAMESPACE_LABEL: &str = "codeflare.dev/e2e-test";

/// `<namespace>/<name>` for logs and error messages.
pub fn object_ref<K: Resource>(object: &K) -> String {
    let name = object
        .meta()
        .name
        .clone()
        .or_else(|| object.meta().generate_name.clone())
        .unwrap_or_default();
    match object.meta().namespace.as_deref() {
        Some(namespace) => format!("{namespace}/{name}"),
        None => name,
    }
}

fn kind_of<K>() -> String
where
    K: Resource,
    K::DynamicType: Default,
{
    K::kind(&K::DynamicType::default()).into_owned()
}

/// Create `object` through `api` and return the server's copy.
pub async fn create_object<K>(api: &Api<K>, object: &K) -> SupportResult<K>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned,
    K::DynamicType: Default,
{
    let kind = kind_of::<K>();
    let created = api
        .create(&PostParams::default(), object)
        .await
        .or_kube_error(&kind, &object_ref(object))?;
    info!("Created {kind} {} successfully", object_ref(&created));
    Ok(created)
}

pub async fn get_object<K>(api: &Api<K>, name: &str) -> SupportResult<K>
where
    K: Resource + Clone + Debug + DeserializeOwned,
    K::DynamicType: Default,
{
    let kind = kind_of::<K>();
    api.get(name).await.or_kube_error(&kind, name)
}

pub async fn list_objects<K>(api: &Api<K>, params: &ListParams) -> SupportResult<Vec<K>>
where
    K: Resource + Clone + Debug + DeserializeOwned,
    K::DynamicType: Default,
{
    let kind = kind_of::<K>();
    let list = api.list(params).await.or_kube_error(&kind, "list")?;
    Ok(list.items)
}

/// Request deletion; completes before the object is actually gone.
pub async fn delete_object<K>(api: &Api<K>, name: &str) -> SupportResult<()>
where
    K: Resource + Clone + Debug + DeserializeOwned,
    K::DynamicType: Default,
{
    let kind = kind_of::<K>();
    info!("Deleting {kind} {name}");
    api.delete(name, &DeleteParams::background())
        .await
        .or_kube_error(&kind, name)?;
    Ok(())
}

/// Namespace manifest with a fixed name, or a generated `test-ns-*` one.
pub fn test_namespace(name: Option<&str>) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: name.map(str::to_string),
            generate_name: name.is_none().then(|| TEST_NAMESPACE_PREFIX.to_string()),
            labels: Some(BTreeMap::from([(
                TEST_NAMESPACE_LABEL.to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub async fn get_namespace(client: &Client, name: &str) -> SupportResult<Namespace> {
    get_object(&Api::<Namespace>::all(client.clone()), name).await
}

pub async fn create_config_map(client: &Client, config_map: &ConfigMap) -> SupportResult<ConfigMap> {
    let namespace = config_map.namespace().unwrap_or_default();
    create_object(&Api::namespaced(client.clone(), &namespace), config_map).await
}

/// Pods in `namespace` matching `labels` (all pods when `labels` is empty).
pub async fn get_pods(
    client: &Client,
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> SupportResult<Vec<Pod>> {
    let mut params = ListParams::default();
    if !labels.is_empty() {
        params = params.labels(&format_labels(labels));
    }
    list_objects(&Api::<Pod>::namespaced(client.clone(), namespace), &params).await
}

/// Logs of one container of `pod`; `None` picks the only container.
pub async fn get_pod_logs(
    client: &Client,
    pod: &Pod,
    container: Option<&str>,
) -> SupportResult<String> {
    let namespace = pod.namespace().unwrap_or_default();
    let params = LogParams {
        container: container.map(str::to_string),
        ..Default::default()
    };
    Api::<Pod>::namespaced(client.clone(), &namespace)
        .logs(&pod.name_any(), &params)
        .await
        .or_kube_error("Pod logs", &object_ref(pod))
}

/// Container names of `pod`, in declaration order.
pub fn container_names(pod: &Pod) -> Vec<String> {
    pod.spec
        .iter()
        .flat_map(|spec| spec.containers.iter())
        .map(|container| container.name.clone())
        .collect()
}

/// Renders a label map as a `k=v,k2=v2` selector, keys sorted.
pub fn format_labels(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}
