use futures::stream::StreamExt;
use k3os_node_sync::{error_policy, reconcile, Context, CONFIG_SECRET_LABEL_SELECTOR};
use k8s_openapi::api::core::v1::{Node, Secret};
use kube::{
    api::Api,
    runtime::{controller::Controller, reflector::ObjectRef, watcher},
    Client,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::filter::Targets::new()
        .with_target("k3os_node_sync", tracing::Level::DEBUG);
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    let client = Client::try_default().await?;
    let context = Arc::new(Context::new(client.clone())?);
    let node_name = context.node_name.clone();

    let node_api: Api<Node> = Api::all(client.clone());
    let secret_api: Api<Secret> = Api::namespaced(client.clone(), &context.secret_namespace);

    info!(
        "Starting node config sync for node '{}', reading secret '{}' in namespace {}...",
        node_name, context.secret_name, context.secret_namespace
    );

    let node_watch = watcher::Config::default().fields(&format!("metadata.name={}", node_name));
    let secret_watch = watcher::Config::default().labels(CONFIG_SECRET_LABEL_SELECTOR);

    Controller::new(node_api, node_watch)
        .watches(secret_api, secret_watch, move |_secret| {
            // Any change to the config secret re-syncs this node.
            Some(ObjectRef::new(&node_name))
        })
        .run(reconcile, error_policy, context)
        .for_each(|res| async move {
            match res {
                Ok((obj, _action)) => info!("Reconciled Node '{}'", obj.name),
                Err(e) => warn!("Reconciliation error: {:?}", e),
            }
        })
        .await;
    Ok(())
}
