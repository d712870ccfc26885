//! Maps Node events onto the Machine reconciles they should trigger.
//!
//! The reconciler's own Machine watch drives the common case; this module
//! exists only to accelerate reaction to state that lives on the Node
//! side: a ready-condition flip (the reconciler stamps `NodeReady` and may
//! re-create on failure) and a newly-visible Node with no `owned-by`
//! label yet (the reconciler is waiting to bind one). Ownership stays
//! one-directional via the label; this is a cache-backed lookup, never a
//! pointer back to the Machine.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;

use machine_shared::k8s::node::is_ready;
use machine_shared::machine::{Machine, LABEL_OWNED_BY};

use super::controller_ctx::ControllerContext;

/// `Controller::watches` mapper: given a Node event, return the Machine(s)
/// (zero or one, in practice) whose reconcile should be requeued.
pub fn map_node_to_machines(
    node: Arc<Node>,
    ctx: Arc<ControllerContext>,
) -> Vec<ObjectRef<Machine>> {
    let node_name = node.name_any();
    let ready = is_ready(&node);
    let ready_changed = ctx
        .node_ready_cache
        .record_and_check_change(&node_name, ready);

    let owned_by = node.labels().get(LABEL_OWNED_BY).cloned();

    // A newly-visible node with no owner label is always worth a nudge:
    // some Machine's ensure-instance loop may be waiting on it.
    let accelerate_first_binding = owned_by.is_none();

    if !ready_changed && !accelerate_first_binding {
        return Vec::new();
    }

    match owned_by.and_then(|uid| ctx.machine_index.lookup(&uid)) {
        Some((namespace, name)) => {
            vec![ObjectRef::new(&name).within(&namespace)]
        }
        // Either unclaimed, or claimed by a Machine this process hasn't
        // indexed yet (e.g. after a restart) -- the Machine's own watch
        // and the ensure-instance requeue-after-15s cover that case.
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus};
    use kube::api::ObjectMeta;
    use machine_provider::ProviderRegistry;
    use machine_shared::config::ControllerConfig;
    use std::collections::BTreeMap;

    fn ctx() -> Arc<ControllerContext> {
        Arc::new(ControllerContext {
            client: Arc::new(
                kube::Client::try_from(kube::Config::new("https://localhost".parse().unwrap()))
                    .unwrap(),
            ),
            kube_client: kube::Client::try_from(kube::Config::new(
                "https://localhost".parse().unwrap(),
            ))
            .unwrap(),
            providers: Arc::new(ProviderRegistry::new()),
            os_plugins: Arc::new(machine_provider::OsPluginRegistry::new()),
            config: ControllerConfig {
                workers: 1,
                shard_name: String::new(),
                join_cluster_timeout: None,
                skip_eviction_after: std::time::Duration::from_secs(60),
                external_bootstrap: false,
                cluster_dns_ips: vec![],
                http_proxy: None,
                https_proxy: None,
                no_proxy: None,
                bootstrap_apiserver_override: None,
            },
            reporter: "test".into(),
            machine_index: Default::default(),
            node_ready_cache: Default::default(),
        })
    }

    fn node(name: &str, ready: bool, owner_uid: Option<&str>) -> Arc<Node> {
        let mut labels = BTreeMap::new();
        if let Some(uid) = owner_uid {
            labels.insert(LABEL_OWNED_BY.to_string(), uid.to_string());
        }
        Arc::new(Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: if ready { "True" } else { "False" }.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    #[test]
    fn unowned_node_is_always_nudged_but_maps_to_nothing_without_an_index_hit() {
        let ctx = ctx();
        let refs = map_node_to_machines(node("n1", false, None), ctx);
        assert!(refs.is_empty());
    }

    #[test]
    fn ready_flip_with_known_owner_maps_to_its_machine() {
        let ctx = ctx();
        ctx.machine_index.record("uid-1", "default", "m1");
        // first sighting always counts as "changed"
        map_node_to_machines(node("n1", false, Some("uid-1")), ctx.clone());
        let refs = map_node_to_machines(node("n1", true, Some("uid-1")), ctx.clone());
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn unchanged_readiness_on_owned_node_produces_no_requeue() {
        let ctx = ctx();
        ctx.machine_index.record("uid-1", "default", "m1");
        map_node_to_machines(node("n1", true, Some("uid-1")), ctx.clone());
        let refs = map_node_to_machines(node("n1", true, Some("uid-1")), ctx.clone());
        assert!(refs.is_empty());
    }
}
