use k8s_openapi::api::core::v1::{Node, NodeSpec, Taint};
use kube::{
    api::{Api, Patch, PatchParams},
    client::Client,
};
use log::trace;
use std::collections::BTreeMap;

/// Get Kubernetes Node with a given name.
pub async fn find_node(name: &str, kube_client: Client) -> Result<Node, anyhow::Error> {
    trace!("find_node with name={}", name);
    let nodes: Api<Node> = Api::all(kube_client);
    let result = nodes.get(name).await;
    Ok(result?)
}

/// True if the node's last condition of type `Ready` reports `True`.
pub fn is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .map(|c| c.status == "True")
        .unwrap_or(false)
}

/// Idempotently merges the given labels, annotations and taints into the
/// node's desired state without touching anything else, via a
/// server-side-apply patch scoped to just those fields. Never overwrites
/// labels/annotations the controller doesn't own.
pub async fn project_machine_fields(
    node_name: &str,
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
    taints: &[Taint],
    field_manager: &str,
    kube_client: Client,
) -> Result<(), anyhow::Error> {
    let nodes: Api<Node> = Api::all(kube_client);
    let patch = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Node",
        "metadata": {
            "name": node_name,
            "labels": labels,
            "annotations": annotations,
        },
        "spec": {
            "taints": taints,
        }
    });
    nodes
        .patch(
            node_name,
            &PatchParams::apply(field_manager),
            &Patch::Apply(&patch),
        )
        .await?;
    Ok(())
}

/// Stamps `spec.providerID` on a node when it isn't already set, using a
/// merge patch so concurrent writers to other node fields aren't clobbered.
pub async fn ensure_provider_id(
    node_name: &str,
    provider_id: &str,
    kube_client: Client,
) -> Result<(), anyhow::Error> {
    let nodes: Api<Node> = Api::all(kube_client);
    let patch = Patch::Merge(serde_json::json!({
        "spec": { "providerID": provider_id }
    }));
    nodes
        .patch(node_name, &PatchParams::default(), &patch)
        .await?;
    Ok(())
}

/// Cordons a node (marks it unschedulable) with a merge patch.
pub async fn cordon(node_name: &str, kube_client: Client) -> Result<(), anyhow::Error> {
    let nodes: Api<Node> = Api::all(kube_client);
    let patch = Patch::Merge(serde_json::json!({
        "spec": { "unschedulable": true }
    }));
    nodes
        .patch(node_name, &PatchParams::default(), &patch)
        .await?;
    Ok(())
}

pub fn is_cordoned(node: &Node) -> bool {
    node.spec
        .as_ref()
        .unwrap_or(&NodeSpec::default())
        .unschedulable
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus};

    fn node_with_ready(status: &str) -> Node {
        Node {
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: status.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn ready_condition() {
        assert!(is_ready(&node_with_ready("True")));
        assert!(!is_ready(&node_with_ready("False")));
        assert!(!is_ready(&Node::default()));
    }

    #[test]
    fn cordoned_state() {
        let mut node = Node::default();
        node.spec = Some(NodeSpec {
            unschedulable: Some(true),
            ..Default::default()
        });
        assert!(is_cordoned(&node));
        assert!(!is_cordoned(&Node::default()));
    }
}
