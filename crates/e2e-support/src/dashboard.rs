//! Locating the Ray dashboard exposed for a `RayCluster`.
//!
//! On OpenShift the operator publishes the dashboard through a `Route`
//! served over TLS; elsewhere it creates an `Ingress`.

use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::networking::v1::IngressLoadBalancerIngress;
use kube::api::ApiResource;
use kube::api::DynamicObject;
use kube::api::GroupVersionKind;
use kube::Api;
use kube::Client;
use reqwest::StatusCode;
use tracing::info;
use url::Url;

use crate::config::TestConfig;
use crate::error::KubeResultExt;
use crate::error::SupportError;
use crate::error::SupportResult;
use crate::eventually::Eventually;
use crate::objects::get_object;

const ROUTE_API_GROUP: &str = "route.openshift.io";

/// Name of the Route/Ingress exposing the dashboard of `cluster`.
pub fn dashboard_name(cluster: &str) -> String {
    format!("ray-dashboard-{cluster}")
}

/// Whether the cluster serves the OpenShift Route API.
pub async fn is_openshift(client: &Client) -> SupportResult<bool> {
    let groups = client
        .list_api_groups()
        .await
        .or_kube_error("APIGroupList", "/apis")?;
    Ok(groups.groups.iter().any(|group| group.name == ROUTE_API_GROUP))
}

fn route_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(ROUTE_API_GROUP, "v1", "Route"),
        "routes",
    )
}

pub async fn get_route(client: &Client, namespace: &str, name: &str) -> SupportResult<DynamicObject> {
    Api::<DynamicObject>::namespaced_with(client.clone(), namespace, &route_resource())
        .get(name)
        .await
        .or_kube_error("Route", &format!("{namespace}/{name}"))
}

/// Host admitted for the first ingress point of a Route.
pub fn route_host(route: &DynamicObject) -> Option<&str> {
    route.data["status"]["ingress"][0]["host"].as_str()
}

pub async fn get_ingress(client: &Client, namespace: &str, name: &str) -> SupportResult<Ingress> {
    get_object(&Api::namespaced(client.clone(), namespace), name).await
}

pub fn load_balancer_ingresses(ingress: &Ingress) -> &[IngressLoadBalancerIngress] {
    ingress
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|balancer| balancer.ingress.as_deref())
        .unwrap_or_default()
}

fn ingress_host(ingress: &Ingress) -> Option<&str> {
    ingress
        .spec
        .as_ref()
        .and_then(|spec| spec.rules.as_ref())
        .and_then(|rules| rules.first())
        .and_then(|rule| rule.host.as_deref())
}

fn parse_url(raw: &str) -> SupportResult<Url> {
    Url::parse(raw).change_context(SupportError::Configuration {
        message: format!("invalid dashboard URL {raw}"),
    })
}

fn missing_host(kind: &str, namespace: &str, name: &str) -> Report<SupportError> {
    Report::new(SupportError::Assertion {
        message: format!("{kind} {namespace}/{name} has no host"),
    })
}

/// Poll `url` until it answers with anything but 503. Routes answer 503 until
/// the router has picked up the backend.
pub async fn wait_until_available(
    http: &reqwest::Client,
    url: &Url,
    config: &TestConfig,
) -> SupportResult<()> {
    Eventually::new(format!("{url} to be available"), || {
        let request = http.get(url.clone());
        async move {
            let response = request.send().await.change_context(SupportError::Http {
                message: "dashboard request failed".to_string(),
            })?;
            Ok::<_, Report<SupportError>>(response.status())
        }
    })
    .timeout(config.timeout_short)
    .interval(config.poll_interval)
    .should(|status| *status != StatusCode::SERVICE_UNAVAILABLE)
    .await?;
    Ok(())
}

/// Resolve the dashboard URL of `cluster`, waiting until it is reachable
/// (OpenShift) or admitted by the ingress controller.
///
/// # Errors
///
/// - [`SupportError::NotFound`] if no Route/Ingress exists for the cluster
/// - [`SupportError::ConditionNotMet`] if it never becomes available within
///   the short timeout
pub async fn ray_dashboard_url(
    client: &Client,
    config: &TestConfig,
    namespace: &str,
    cluster: &str,
) -> SupportResult<Url> {
    let name = dashboard_name(cluster);

    if is_openshift(client).await? {
        let route = get_route(client, namespace, &name).await?;
        let host = route_host(&route).ok_or_else(|| missing_host("Route", namespace, &name))?;
        let url = parse_url(&format!("https://{host}"))?;

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .change_context(SupportError::Http {
                message: "failed to build HTTP client".to_string(),
            })?;

        info!("Waiting for Route {namespace}/{name} to be available");
        wait_until_available(&http, &url, config).await?;

        info!(%url, "Ray dashboard route");
        return Ok(url);
    }

    info!("Waiting for Ingress {namespace}/{name} to be admitted");
    let ingress = Eventually::new(format!("Ingress {namespace}/{name} to be admitted"), || {
        get_ingress(client, namespace, &name)
    })
    .timeout(config.timeout_short)
    .interval(config.poll_interval)
    .should(|ingress| load_balancer_ingresses(ingress).len() == 1)
    .await?;

    let host = ingress_host(&ingress).ok_or_else(|| missing_host("Ingress", namespace, &name))?;
    let url = parse_url(&format!("http://{host}"))?;
    info!(%url, "Ray dashboard ingress");
    Ok(url)
}
