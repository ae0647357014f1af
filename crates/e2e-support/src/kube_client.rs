use std::path::Path;

use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;
use tracing::info;

use crate::error::SupportError;
use crate::error::SupportResult;

/// Connect to the cluster under test.
///
/// With `kubeconfig` set, that file's current context is used; otherwise the
/// configuration is inferred (`KUBECONFIG`, `~/.kube/config`, then in-cluster).
pub async fn connect(kubeconfig: Option<&Path>) -> SupportResult<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).change_context(
                SupportError::Configuration {
                    message: format!("failed to read kubeconfig {}", path.display()),
                },
            )?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .change_context(SupportError::Configuration {
                    message: format!("invalid kubeconfig {}", path.display()),
                })?
        }
        None => Config::infer()
            .await
            .change_context(SupportError::Configuration {
                message: "no usable Kubernetes configuration found".to_string(),
            })?,
    };

    info!(cluster_url = %config.cluster_url, "connecting to cluster under test");

    Client::try_from(config).change_context(SupportError::Kube {
        message: "failed to create Kubernetes client".to_string(),
    })
}
