//! Shared API type definitions
//!
//! Typed views of the custom resources the end-to-end scenarios submit to the
//! cluster. The schemas belong to the external controllers (KubeRay, Kueue and
//! the AppWrapper controller); only the subset the scenarios read or write is
//! modelled here, and unknown status values are preserved rather than rejected.

pub mod appwrapper;
pub mod kueue;
pub mod ray;

pub use appwrapper::AppWrapper;
pub use appwrapper::AppWrapperComponent;
pub use appwrapper::AppWrapperPhase;
pub use appwrapper::AppWrapperSpec;
pub use appwrapper::AppWrapperStatus;
pub use kueue::ClusterQueue;
pub use kueue::ClusterQueueSpec;
pub use kueue::FlavorQuotas;
pub use kueue::LocalQueue;
pub use kueue::LocalQueueSpec;
pub use kueue::ResourceFlavor;
pub use kueue::ResourceFlavorSpec;
pub use kueue::ResourceGroup;
pub use kueue::ResourceQuota;
pub use ray::ClusterState;
pub use ray::HeadGroupSpec;
pub use ray::JobStatus;
pub use ray::RayCluster;
pub use ray::RayClusterSpec;
pub use ray::RayClusterStatus;
pub use ray::RayJob;
pub use ray::RayJobSpec;
pub use ray::RayJobStatus;
pub use ray::WorkerGroupSpec;

/// Label that assigns a workload to a Kueue `LocalQueue`.
pub const QUEUE_NAME_LABEL: &str = "kueue.x-k8s.io/queue-name";

/// Annotation marking a `LocalQueue` as the namespace default.
pub const DEFAULT_QUEUE_ANNOTATION: &str = "kueue.x-k8s.io/default-queue";

/// Cluster selector key a `RayJob` uses to target an existing `RayCluster`.
pub const RAY_CLUSTER_SELECTOR_KEY: &str = "ray.io/cluster";
