use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, DeleteParams, EvictParams, ListParams, ObjectList, PostParams},
    client::Client,
};
use log::{error, trace};

use super::ERROR_NOT_FOUND;

/// Get Kubernetes Pods with a given label or field selector.
pub async fn find_pods_with_selector(
    label_selector: Option<String>,
    field_selector: Option<String>,
    kube_client: Client,
) -> Result<ObjectList<Pod>, anyhow::Error> {
    trace!(
        "find_pods_with_selector with label_selector={:?} field_selector={:?}",
        &label_selector,
        &field_selector
    );
    let pods: Api<Pod> = Api::all(kube_client);
    let pod_list_params = ListParams {
        label_selector,
        field_selector,
        ..Default::default()
    };
    let result = pods.list(&pod_list_params).await;
    Ok(result?)
}

/// Pods scheduled on a given node, as used by the eviction engine and the
/// volume-attachment cleaner.
pub async fn find_pods_on_node(
    node_name: &str,
    kube_client: Client,
) -> Result<ObjectList<Pod>, anyhow::Error> {
    find_pods_with_selector(None, Some(format!("spec.nodeName={}", node_name)), kube_client).await
}

/// True if the pod is owned by a DaemonSet -- daemonset pods are never
/// evicted, they are recreated on every schedulable node automatically.
pub fn is_daemonset_pod(pod: &Pod) -> bool {
    pod.metadata
        .owner_references
        .as_ref()
        .map(|refs| refs.iter().any(|r| r.kind == "DaemonSet"))
        .unwrap_or(false)
}

/// True if the pod is a static/mirror pod (annotated by the kubelet).
pub fn is_mirror_pod(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .map(|a| a.contains_key("kubernetes.io/config.mirror"))
        .unwrap_or(false)
}

/// True if the pod has already terminated and needs no eviction.
pub fn is_finished(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    )
}

/// Outcome of attempting to evict a single pod.
#[derive(Debug, PartialEq, Eq)]
pub enum EvictOutcome {
    /// The pod was evicted, or was already gone.
    Evicted,
    /// A PodDisruptionBudget denied the eviction; caller should requeue.
    Blocked,
}

/// Evict a pod through the policy/v1 eviction subresource.
pub async fn evict_pod(
    pod_name: &str,
    namespace: &str,
    kube_client: Client,
) -> Result<EvictOutcome, anyhow::Error> {
    let pods: Api<Pod> = Api::namespaced(kube_client, namespace);
    match pods.evict(pod_name, &EvictParams::default()).await {
        Ok(_) => Ok(EvictOutcome::Evicted),
        Err(kube::Error::Api(ae)) if ae.code == ERROR_NOT_FOUND => Ok(EvictOutcome::Evicted),
        Err(kube::Error::Api(ae)) if ae.code == super::ERROR_TOO_MANY_REQUESTS => {
            trace!("evict_pod {} blocked by PodDisruptionBudget", pod_name);
            Ok(EvictOutcome::Blocked)
        }
        Err(e) => {
            error!("evict_pod {} failed: {:?}", pod_name, e);
            Err(anyhow::anyhow!(e))
        }
    }
}

/// Delete a pod outright (used by the volume-attachment cleaner, which has
/// no PDB-aware path since the pod is being forcibly unstuck from a volume,
/// not gracefully drained).
pub async fn delete_pod(
    pod_name: &str,
    namespace: &str,
    kube_client: Client,
) -> Result<EvictOutcome, anyhow::Error> {
    let pods: Api<Pod> = Api::namespaced(kube_client, namespace);
    match pods.delete(pod_name, &DeleteParams::default()).await {
        Ok(_) => Ok(EvictOutcome::Evicted),
        Err(kube::Error::Api(ae)) if ae.code == ERROR_NOT_FOUND => Ok(EvictOutcome::Evicted),
        Err(e) => Err(anyhow::anyhow!(e)),
    }
}

/// Create a pod, tolerating "already exists".
pub async fn create_pod(
    pod_to_create: &Pod,
    namespace: &str,
    kube_client: Client,
) -> Result<(), anyhow::Error> {
    let pods: Api<Pod> = Api::namespaced(kube_client, namespace);
    match pods.create(&PostParams::default(), pod_to_create).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == super::ERROR_CONFLICT => Ok(()),
        Err(e) => Err(anyhow::anyhow!(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    fn pod_with_owner(kind: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                owner_references: Some(vec![OwnerReference {
                    kind: kind.to_string(),
                    name: "owner".to_string(),
                    uid: "uid".to_string(),
                    api_version: "v1".to_string(),
                    controller: Some(true),
                    block_owner_deletion: Some(true),
                }]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn recognizes_daemonset_pods() {
        assert!(is_daemonset_pod(&pod_with_owner("DaemonSet")));
        assert!(!is_daemonset_pod(&pod_with_owner("ReplicaSet")));
        assert!(!is_daemonset_pod(&Pod::default()));
    }

    #[test]
    fn recognizes_mirror_pods() {
        let mut pod = Pod::default();
        pod.metadata.annotations = Some(
            [("kubernetes.io/config.mirror".to_string(), "hash".to_string())]
                .into_iter()
                .collect(),
        );
        assert!(is_mirror_pod(&pod));
        assert!(!is_mirror_pod(&Pod::default()));
    }

    #[test]
    fn recognizes_finished_pods() {
        let mut pod = Pod::default();
        pod.status = Some(k8s_openapi::api::core::v1::PodStatus {
            phase: Some("Succeeded".to_string()),
            ..Default::default()
        });
        assert!(is_finished(&pod));
        assert!(!is_finished(&Pod::default()));
    }
}
