//! `AppWrapper` resources (`workload.codeflare.dev/v1beta2`).

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use serde::Deserialize;
use serde::Serialize;

/// Bundles arbitrary Kubernetes objects so they are admitted and torn down as a unit.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "workload.codeflare.dev",
    version = "v1beta2",
    kind = "AppWrapper",
    namespaced,
    status = "AppWrapperStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase", default)]
pub struct AppWrapperSpec {
    pub components: Vec<AppWrapperComponent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspend: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppWrapperComponent {
    /// The wrapped object, kept as raw JSON.
    pub template: serde_json::Value,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppWrapperStatus {
    pub phase: AppWrapperPhase,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum AppWrapperPhase {
    #[default]
    #[serde(rename = "")]
    Empty,
    Suspended,
    Resuming,
    Running,
    Resetting,
    Suspending,
    Succeeded,
    Failed,
    Terminating,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for AppWrapperPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("<none>"),
            other => write!(f, "{other:?}"),
        }
    }
}
