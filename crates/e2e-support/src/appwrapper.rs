//! Wrapping a `RayCluster` into an `AppWrapper` so Kueue admits it as one unit.

use std::collections::BTreeMap;

use api_types::AppWrapper;
use api_types::AppWrapperComponent;
use api_types::AppWrapperPhase;
use api_types::AppWrapperSpec;
use api_types::RayCluster;
use api_types::QUEUE_NAME_LABEL;
use error_stack::ResultExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::ListParams;
use kube::Api;
use kube::Client;
use kube::ResourceExt;
use serde_json::Value;

use crate::error::SupportError;
use crate::error::SupportResult;
use crate::objects::create_object;
use crate::objects::delete_object;
use crate::objects::list_objects;

/// Server-populated fields a component template must not carry.
const SERVER_METADATA: [&str; 3] = ["creationTimestamp", "resourceVersion", "uid"];

/// `object` as a JSON template fit for an `AppWrapper` component.
pub fn component_template<K: serde::Serialize>(object: &K) -> SupportResult<Value> {
    let mut template = serde_json::to_value(object).change_context(SupportError::Serialization {
        message: "failed to serialize AppWrapper component".to_string(),
    })?;

    if let Some(fields) = template.as_object_mut() {
        fields.remove("status");
        if let Some(metadata) = fields.get_mut("metadata").and_then(Value::as_object_mut) {
            for field in SERVER_METADATA {
                metadata.remove(field);
            }
        }
    }
    Ok(template)
}

/// `AppWrapper` in `namespace` carrying `cluster` and queued on `local_queue`.
///
/// The name is generated from the cluster's.
pub fn app_wrapper(
    cluster: &RayCluster,
    namespace: &str,
    local_queue: &str,
) -> SupportResult<AppWrapper> {
    Ok(AppWrapper {
        metadata: ObjectMeta {
            generate_name: Some(cluster.name_any()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                QUEUE_NAME_LABEL.to_string(),
                local_queue.to_string(),
            )])),
            ..Default::default()
        },
        spec: AppWrapperSpec {
            components: vec![AppWrapperComponent {
                template: component_template(cluster)?,
            }],
            suspend: None,
        },
        status: None,
    })
}

pub fn app_wrapper_phase(app_wrapper: &AppWrapper) -> AppWrapperPhase {
    app_wrapper
        .status
        .as_ref()
        .map(|status| status.phase)
        .unwrap_or_default()
}

pub async fn create_app_wrapper(client: &Client, app_wrapper: &AppWrapper) -> SupportResult<AppWrapper> {
    let namespace = app_wrapper.namespace().unwrap_or_default();
    create_object(&Api::namespaced(client.clone(), &namespace), app_wrapper).await
}

pub async fn get_app_wrappers(client: &Client, namespace: &str) -> SupportResult<Vec<AppWrapper>> {
    list_objects(
        &Api::namespaced(client.clone(), namespace),
        &ListParams::default(),
    )
    .await
}

pub async fn delete_app_wrapper(client: &Client, namespace: &str, name: &str) -> SupportResult<()> {
    delete_object(&Api::<AppWrapper>::namespaced(client.clone(), namespace), name).await
}
