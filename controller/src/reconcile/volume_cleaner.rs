//! Volume-attachment cleaner (§4.4): unsticks pods pinned to a node by a
//! `VolumeAttachment` that the provider won't detach on instance deletion
//! (vSphere with an external CSI driver is the motivating case).

use futures::future::join_all;
use kube::Client;

use machine_shared::k8s::node::cordon;
use machine_shared::k8s::pod::{delete_pod, find_pods_on_node, EvictOutcome};
use machine_shared::k8s::volume_attachment::{find_for_node, pv_name, resolve_claim};

/// Frees a node of `VolumeAttachment`s by deleting the pods pinning them.
/// Returns `(deleted_something, volumes_free)`; the reconciler requeues
/// until `volumes_free`.
pub async fn free_volumes(node_name: &str, kube_client: Client) -> Result<(bool, bool), anyhow::Error> {
    let attachments = find_for_node(node_name, kube_client.clone()).await?;
    if attachments.is_empty() {
        return Ok((false, true));
    }

    cordon(node_name, kube_client.clone()).await?;

    let pods_on_node = find_pods_on_node(node_name, kube_client.clone()).await?;

    let mut claimed_pvcs = Vec::new();
    for attachment in &attachments {
        let Some(pv) = pv_name(attachment) else {
            continue;
        };
        if let Some(claim) = resolve_claim(pv, kube_client.clone()).await? {
            claimed_pvcs.push(claim);
        }
    }

    let targets: Vec<_> = pods_on_node
        .items
        .into_iter()
        .filter(|p| {
            p.spec
                .as_ref()
                .and_then(|s| s.volumes.as_ref())
                .map(|volumes| {
                    volumes.iter().any(|v| {
                        v.persistent_volume_claim.as_ref().is_some_and(|pvc| {
                            let namespace = p.metadata.namespace.as_deref().unwrap_or_default();
                            claimed_pvcs
                                .iter()
                                .any(|(ns, name)| ns == namespace && name == &pvc.claim_name)
                        })
                    })
                })
                .unwrap_or(false)
        })
        .collect();

    if targets.is_empty() {
        return Ok((false, false));
    }

    let outcomes = join_all(targets.iter().map(|p| {
        let kube_client = kube_client.clone();
        let name = p.metadata.name.clone().unwrap_or_default();
        let namespace = p.metadata.namespace.clone().unwrap_or_default();
        async move { delete_pod(&name, &namespace, kube_client).await }
    }))
    .await;

    let mut deleted_something = false;
    for outcome in outcomes {
        if let EvictOutcome::Evicted = outcome? {
            deleted_something = true;
        }
    }

    Ok((deleted_something, false))
}
