//! MNIST training submitted as a `RayJob` to a Kueue-managed `RayCluster`.

use api_types::AppWrapperPhase;
use api_types::ClusterState;
use api_types::JobStatus;
use api_types::RayCluster;
use api_types::ResourceFlavorSpec;
use e2e_support::appwrapper::app_wrapper;
use e2e_support::appwrapper::app_wrapper_phase;
use e2e_support::appwrapper::create_app_wrapper;
use e2e_support::appwrapper::delete_app_wrapper;
use e2e_support::appwrapper::get_app_wrappers;
use e2e_support::kueue::cluster_queue_spec;
use e2e_support::kueue::create_local_queue;
use e2e_support::objects::create_config_map;
use e2e_support::ray::create_ray_cluster;
use e2e_support::ray::create_ray_job;
use e2e_support::ray::delete_ray_cluster;
use e2e_support::ray::get_ray_cluster;
use e2e_support::ray::get_ray_clusters;
use e2e_support::ray::get_ray_job;
use e2e_support::ray::get_ray_job_id;
use e2e_support::ray::mnist_config_map;
use e2e_support::ray::ray_cluster;
use e2e_support::ray::ray_cluster_state;
use e2e_support::ray::ray_job;
use e2e_support::ray::ray_job_status;
use e2e_support::ray::RayClusterParams;
use e2e_support::Accelerator;
use e2e_support::SupportError;
use e2e_support::SupportResult;
use e2e_support::TestContext;
use error_stack::Report;
use k8s_openapi::api::core::v1::LocalObjectReference;
use kube::ResourceExt;
use tracing::info;

/// Fixed so the dashboard host can be mapped in `/etc/hosts` ahead of the run.
pub const RAY_CLUSTER_NAMESPACE: &str = "test-ns-1";
pub const APP_WRAPPER_NAMESPACE: &str = "test-ns-2";

pub const CUSTOM_PULL_SECRET: &str = "custom-pull-secret";

/// Resource flavor, cluster queue sized for `accelerator`, and a default
/// local queue in `namespace`. Returns the local queue name.
async fn create_queues(
    ctx: &mut TestContext,
    namespace: &str,
    accelerator: Accelerator,
) -> SupportResult<String> {
    let flavor = ctx.create_resource_flavor(ResourceFlavorSpec::default()).await?;
    let cluster_queue = ctx
        .create_cluster_queue(cluster_queue_spec(&flavor.name_any(), accelerator))
        .await?;
    let local_queue = create_local_queue(ctx.client(), namespace, &cluster_queue, true).await?;
    Ok(local_queue.name_any())
}

async fn wait_ray_cluster_ready(ctx: &TestContext, namespace: &str, name: &str) -> SupportResult<RayCluster> {
    info!("Waiting for RayCluster {namespace}/{name} to be running");
    ctx.eventually(format!("RayCluster {namespace}/{name} to be ready"), || {
        get_ray_cluster(ctx.client(), namespace, name)
    })
    .should(|cluster| ray_cluster_state(cluster) == Some(ClusterState::Ready))
    .await
}

/// Submit the training job to `cluster`, wait for it to finish and check it
/// succeeded. The job's dashboard logs are stored either way.
async fn run_mnist_job(
    ctx: &TestContext,
    cluster: &RayCluster,
    accelerator: Accelerator,
    image: &str,
) -> SupportResult<()> {
    let job = create_ray_job(
        ctx.client(),
        &ray_job(cluster, accelerator, image, ctx.config())?,
    )
    .await?;
    let namespace = job.namespace().unwrap_or_default();
    let name = job.name_any();

    let dashboard = ctx
        .ray_dashboard_url(&namespace, &cluster.name_any())
        .await?;
    info!("Connecting to Ray cluster at: {dashboard}");
    let ray_client = ctx.ray_client(dashboard)?;

    info!("Waiting for RayJob {namespace}/{name} to complete");
    ctx.eventually(format!("RayJob {namespace}/{name} to complete"), || {
        get_ray_job(ctx.client(), &namespace, &name)
    })
    .timeout(ctx.config().timeout_long)
    .should(|job| ray_job_status(job).is_terminal())
    .await?;

    let status = ray_job_status(&get_ray_job(ctx.client(), &namespace, &name).await?);

    let job_id = get_ray_job_id(ctx.client(), &namespace, &name).await?;
    ctx.write_ray_job_api_logs(&ray_client, &job_id).await;

    if status != JobStatus::Succeeded {
        return Err(Report::new(SupportError::Assertion {
            message: format!("RayJob {namespace}/{name} finished with status {status}"),
        }));
    }
    Ok(())
}

/// Trains MNIST on a `RayCluster` queued directly through Kueue, then
/// deletes the cluster.
pub async fn mnist_rayjob_raycluster(ctx: &mut TestContext, accelerator: Accelerator) -> SupportResult<()> {
    let namespace = ctx
        .new_test_namespace(Some(RAY_CLUSTER_NAMESPACE))
        .await?
        .name_any();
    let local_queue = create_queues(ctx, &namespace, accelerator).await?;
    let config_map = create_config_map(ctx.client(), &mnist_config_map(&namespace)).await?;
    let image = accelerator.ray_image(ctx.config()).to_string();

    let cluster = ray_cluster(&RayClusterParams {
        namespace: &namespace,
        local_queue: &local_queue,
        config_map: &config_map.name_any(),
        accelerator,
        image: &image,
        ray_version: &ctx.config().ray_version,
        wrapped_in_app_wrapper: false,
    });
    let cluster = create_ray_cluster(ctx.client(), &cluster).await?;
    let cluster_name = cluster.name_any();
    let cluster = wait_ray_cluster_ready(ctx, &namespace, &cluster_name).await?;

    run_mnist_job(ctx, &cluster, accelerator, &image).await?;

    delete_ray_cluster(ctx.client(), &namespace, &cluster_name).await?;
    info!("Waiting for RayCluster {namespace}/{cluster_name} to be deleted");
    ctx.eventually(format!("RayClusters in {namespace} to be deleted"), || {
        get_ray_clusters(ctx.client(), &namespace)
    })
    .timeout(ctx.config().timeout_short)
    .should(Vec::is_empty)
    .await?;
    Ok(())
}

/// Same training, with the `RayCluster` wrapped in an `AppWrapper` that is
/// queued instead of the cluster itself.
pub async fn mnist_rayjob_raycluster_appwrapper(
    ctx: &mut TestContext,
    accelerator: Accelerator,
) -> SupportResult<()> {
    let namespace = ctx
        .new_test_namespace(Some(APP_WRAPPER_NAMESPACE))
        .await?
        .name_any();
    let local_queue = create_queues(ctx, &namespace, accelerator).await?;
    let config_map = create_config_map(ctx.client(), &mnist_config_map(&namespace)).await?;
    let image = accelerator.ray_image(ctx.config()).to_string();

    let cluster = ray_cluster(&RayClusterParams {
        namespace: &namespace,
        local_queue: &local_queue,
        config_map: &config_map.name_any(),
        accelerator,
        image: &image,
        ray_version: &ctx.config().ray_version,
        wrapped_in_app_wrapper: true,
    });
    let wrapper = create_app_wrapper(
        ctx.client(),
        &app_wrapper(&cluster, &namespace, &local_queue)?,
    )
    .await?;
    let wrapper_name = wrapper.name_any();

    info!("Waiting for AppWrapper {namespace}/{wrapper_name} to be running");
    ctx.eventually(format!("an AppWrapper in {namespace} to be running"), || {
        get_app_wrappers(ctx.client(), &namespace)
    })
    .should(|wrappers| {
        wrappers
            .iter()
            .any(|wrapper| app_wrapper_phase(wrapper) == AppWrapperPhase::Running)
    })
    .await?;

    let cluster = wait_ray_cluster_ready(ctx, &namespace, &cluster.name_any()).await?;

    run_mnist_job(ctx, &cluster, accelerator, &image).await?;

    delete_app_wrapper(ctx.client(), &namespace, &wrapper_name).await?;
    info!("Waiting for AppWrapper {namespace}/{wrapper_name} to be deleted");
    ctx.eventually(format!("AppWrappers in {namespace} to be deleted"), || {
        get_app_wrappers(ctx.client(), &namespace)
    })
    .timeout(ctx.config().timeout_short)
    .should(Vec::is_empty)
    .await?;
    Ok(())
}

/// Reference `secret` from the head pod so its image is pulled with it.
pub fn with_image_pull_secret(cluster: &mut RayCluster, secret: &str) {
    let pod = cluster
        .spec
        .head_group_spec
        .template
        .spec
        .get_or_insert_with(Default::default);
    pod.image_pull_secrets = Some(vec![LocalObjectReference {
        name: Some(secret.to_string()),
    }]);
}

/// A head pod referencing an image pull secret must still come up.
pub async fn raycluster_image_pull_secret(ctx: &mut TestContext) -> SupportResult<()> {
    let namespace = ctx.new_test_namespace(None).await?.name_any();
    let local_queue = create_queues(ctx, &namespace, Accelerator::Cpu).await?;
    let config_map = create_config_map(ctx.client(), &mnist_config_map(&namespace)).await?;

    let mut cluster = ray_cluster(&RayClusterParams {
        namespace: &namespace,
        local_queue: &local_queue,
        config_map: &config_map.name_any(),
        accelerator: Accelerator::Cpu,
        image: &ctx.config().ray_image,
        ray_version: &ctx.config().ray_version,
        wrapped_in_app_wrapper: false,
    });
    with_image_pull_secret(&mut cluster, CUSTOM_PULL_SECRET);

    let cluster = create_ray_cluster(ctx.client(), &cluster).await?;
    wait_ray_cluster_ready(ctx, &namespace, &cluster.name_any()).await?;
    Ok(())
}
