mod reconcile;
mod util;

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client};

use machine_baremetal::{SshConnectionPool, SshDriver, TinkerbellProvider};
use machine_provider::ProviderRegistry;
use machine_shared::config::ControllerConfig;
use machine_shared::machine::Machine;
use machine_shared::os::env_var::ActualEnvVarQuery;

use util::controller_ctx::ControllerContext;
use util::node_watcher::map_node_to_machines;

/// Entry point for the machine controller.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    env_logger::try_init()?;
    log::info!("machine-controller starting");

    let config = ControllerConfig::from_env(&ActualEnvVarQuery);
    let kube_client = Client::try_default().await?;

    let mut providers = ProviderRegistry::new();
    providers
        .register(Arc::new(TinkerbellProvider::new(kube_client.clone())))
        .register(Arc::new(SshDriver::new(Arc::new(SshConnectionPool::new()))));
    log::info!("registered providers: {:?}", providers.active_providers());

    let ctx = Arc::new(ControllerContext::new(
        Arc::new(kube_client.clone()),
        kube_client.clone(),
        Arc::new(providers),
        config,
    ));

    let metrics_server = tokio::spawn(async move {
        if let Err(e) = machine_shared::metrics::run_metrics_server().await {
            log::error!("metrics server exited: {e}");
        }
    });

    let machines: Api<Machine> = Api::all(kube_client.clone());
    let nodes: Api<k8s_openapi::api::core::v1::Node> = Api::all(kube_client.clone());

    Controller::new(machines, watcher::Config::default())
        .watches(nodes, watcher::Config::default(), map_node_to_machines)
        .shutdown_on_signal()
        .run(reconcile::reconcile, reconcile::error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((object_ref, _action)) => log::debug!("reconciled {object_ref:?}"),
                Err(e) => log::warn!("reconcile error: {e}"),
            }
        })
        .await;

    metrics_server.abort();
    log::info!("machine-controller stopped");
    Ok(())
}
