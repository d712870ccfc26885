//! Drain engine: evicts pods off a Machine's Node before cloud cleanup
//! (§4.3). Cordon-then-evict, never a hard delete -- that's left to the
//! volume-attachment cleaner for the narrower case it exists for.

use std::time::Duration;

use futures::future::join_all;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client, ResourceExt};
use log::warn;

use machine_shared::k8s::node::{self, is_cordoned};
use machine_shared::k8s::pod::{self, is_daemonset_pod, is_finished, is_mirror_pod, EvictOutcome};
use machine_shared::machine::Machine;

const CORDON_VISIBILITY_POLL: Duration = Duration::from_millis(500);
const CORDON_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(10);
const SKIP_EVICTION_ANNOTATION: &str = "machine.k8s.io/skip-eviction";

/// Whether the node opts out of draining entirely.
pub fn skips_eviction(node: &Node) -> bool {
    node.metadata
        .annotations
        .as_ref()
        .map(|a| a.contains_key(SKIP_EVICTION_ANNOTATION))
        .unwrap_or(false)
}

/// §4.3 gate (c): a target must exist for the relocated workload to land
/// on, either a replacement Machine already underway (another Machine with
/// no `NodeRef` yet and not itself being deleted) or another schedulable
/// Node. Without either, draining would just strand pods `Pending`.
pub fn should_evict(
    current_node_name: &str,
    current_namespace: &str,
    current_machine_name: &str,
    machines: &[Machine],
    nodes: &[Node],
) -> bool {
    let replacement_incoming = machines.iter().any(|m| {
        let is_self = m.namespace().as_deref() == Some(current_namespace) && m.spec.name == current_machine_name;
        !is_self
            && m.meta().deletion_timestamp.is_none()
            && m.status.as_ref().map(|s| s.node_ref.is_none()).unwrap_or(true)
    });
    if replacement_incoming {
        return true;
    }

    nodes.iter().any(|n| {
        n.metadata.name.as_deref() != Some(current_node_name)
            && !n.spec.as_ref().and_then(|s| s.unschedulable).unwrap_or(false)
    })
}

/// Fetches the Machines and Nodes `should_evict` needs to decide.
pub async fn has_viable_target(
    current_node_name: &str,
    current_namespace: &str,
    current_machine_name: &str,
    kube_client: Client,
) -> Result<bool, anyhow::Error> {
    let machines = Api::<Machine>::all(kube_client.clone()).list(&Default::default()).await?;
    let nodes = Api::<Node>::all(kube_client).list(&Default::default()).await?;
    Ok(should_evict(
        current_node_name,
        current_namespace,
        current_machine_name,
        &machines.items,
        &nodes.items,
    ))
}

/// Cordons the node, retrying on conflict, then polls up to 10s for the
/// change to be visible through the same client -- avoids racing the
/// scheduler, which may read a stale cached copy for a moment.
async fn cordon_and_wait_visible(node_name: &str, kube_client: Client) -> Result<(), anyhow::Error> {
    for attempt in 0..machine_shared::retry::MAX_UPDATE_TRIES {
        match node::cordon(node_name, kube_client.clone()).await {
            Ok(()) => break,
            Err(e) if attempt + 1 == machine_shared::retry::MAX_UPDATE_TRIES => return Err(e),
            Err(_) => machine_shared::retry::random_delay().await,
        }
    }

    let deadline = tokio::time::Instant::now() + CORDON_VISIBILITY_TIMEOUT;
    loop {
        let current = node::find_node(node_name, kube_client.clone()).await?;
        if is_cordoned(&current) {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            warn!("cordon of node {node_name} not visible after {CORDON_VISIBILITY_TIMEOUT:?}, proceeding anyway");
            return Ok(());
        }
        tokio::time::sleep(CORDON_VISIBILITY_POLL).await;
    }
}

/// Drains one pass over a node's evictable pods. Returns
/// `(evicted_something, blocked_by_pdb)`; the reconciler requeues while
/// either is true until a pass evicts and blocks nothing.
pub async fn drain(node_name: &str, kube_client: Client) -> Result<(bool, bool), anyhow::Error> {
    cordon_and_wait_visible(node_name, kube_client.clone()).await?;

    let pods = pod::find_pods_on_node(node_name, kube_client.clone()).await?;
    let targets: Vec<_> = pods
        .items
        .into_iter()
        .filter(|p| !is_finished(p) && !is_daemonset_pod(p) && !is_mirror_pod(p))
        .collect();

    if targets.is_empty() {
        return Ok((false, false));
    }

    let outcomes = join_all(targets.iter().map(|p| {
        let kube_client = kube_client.clone();
        let name = p.metadata.name.clone().unwrap_or_default();
        let namespace = p.metadata.namespace.clone().unwrap_or_default();
        async move { pod::evict_pod(&name, &namespace, kube_client).await }
    }))
    .await;

    let mut evicted_something = false;
    let mut blocked = false;
    for outcome in outcomes {
        match outcome? {
            EvictOutcome::Evicted => evicted_something = true,
            EvictOutcome::Blocked => blocked = true,
        }
    }

    Ok((evicted_something, blocked))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    #[test]
    fn detects_skip_eviction_annotation() {
        let mut node = Node::default();
        node.metadata = ObjectMeta {
            annotations: Some(BTreeMap::from([(
                SKIP_EVICTION_ANNOTATION.to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        };
        assert!(skips_eviction(&node));
        assert!(!skips_eviction(&Node::default()));
    }

    fn node_named(name: &str, unschedulable: bool) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(k8s_openapi::api::core::v1::NodeSpec {
                unschedulable: if unschedulable { Some(true) } else { None },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn no_target_when_sole_node_and_no_replacement_machine() {
        let nodes = vec![node_named("node1", false)];
        assert!(!should_evict("node1", "default", "m1", &[], &nodes));
    }

    #[test]
    fn target_available_once_second_schedulable_node_exists() {
        let nodes = vec![node_named("node1", false), node_named("node2", false)];
        assert!(should_evict("node1", "default", "m1", &[], &nodes));
    }

    #[test]
    fn target_available_when_a_replacement_machine_is_incoming() {
        let nodes = vec![node_named("node1", false)];
        let mut replacement = Machine::new("m2", machine_shared::machine::MachineSpec::default());
        replacement.metadata.namespace = Some("default".to_string());
        replacement.spec.name = "m2".to_string();
        assert!(should_evict("node1", "default", "m1", std::slice::from_ref(&replacement), &nodes));
    }
}
