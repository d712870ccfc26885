use k8s_openapi::api::core::v1::PersistentVolume;
use k8s_openapi::api::storage::v1::VolumeAttachment;
use kube::{api::Api, client::Client};
use log::trace;

/// Lists `VolumeAttachment`s bound to a node. Cluster-scoped, so no
/// namespace is involved.
pub async fn find_for_node(
    node_name: &str,
    kube_client: Client,
) -> Result<Vec<VolumeAttachment>, anyhow::Error> {
    trace!("find_for_node node_name={}", node_name);
    let api: Api<VolumeAttachment> = Api::all(kube_client);
    let all = api.list(&Default::default()).await?;
    Ok(all
        .items
        .into_iter()
        .filter(|va| va.spec.node_name == node_name)
        .collect())
}

/// The PersistentVolume name a VolumeAttachment's source refers to.
pub fn pv_name(va: &VolumeAttachment) -> Option<&str> {
    va.spec.source.persistent_volume_name.as_deref()
}

/// Resolves a PersistentVolume name to the (namespace, name) of the PVC
/// bound to it, if any. A VolumeAttachment only pins pods through this
/// indirection -- it names a PV, never a PVC directly.
pub async fn resolve_claim(
    pv_name: &str,
    kube_client: Client,
) -> Result<Option<(String, String)>, anyhow::Error> {
    let pvs: Api<PersistentVolume> = Api::all(kube_client);
    let pv = match pvs.get_opt(pv_name).await? {
        Some(pv) => pv,
        None => return Ok(None),
    };
    Ok(pv
        .spec
        .and_then(|s| s.claim_ref)
        .and_then(|c| Some((c.namespace?, c.name?))))
}
