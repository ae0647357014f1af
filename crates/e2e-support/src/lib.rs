//! Support library for the CodeFlare end-to-end scenarios.
//!
//! Builders for the objects the scenarios submit (Kueue queues, Ray
//! clusters and jobs, AppWrappers), typed accessors used inside polling
//! predicates, the [`Eventually`] poller, Ray dashboard access and the
//! per-scenario [`TestContext`] that cleans up after itself.

pub mod accelerator;
pub mod appwrapper;
pub mod batch;
pub mod config;
pub mod context;
pub mod dashboard;
pub mod error;
pub mod eventually;
pub mod kube_client;
pub mod kueue;
pub mod objects;
pub mod ray;
pub mod ray_client;

#[cfg(test)]
mod testing;

pub use accelerator::Accelerator;
pub use config::TestConfig;
pub use context::Cleanup;
pub use context::TestContext;
pub use error::is_not_found;
pub use error::SupportError;
pub use error::SupportResult;
pub use eventually::Eventually;
pub use ray_client::RayClusterClient;
