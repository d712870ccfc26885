//! The Machine reconciler (§4.1): trigger/filter, deletion, creation and
//! reconciliation branches, wired together into the function
//! `kube::runtime::Controller` drives.

pub mod bootstrap_token;
pub mod correlator;
pub mod ensure_instance;
pub mod eviction;
pub mod owner_chain;
pub mod userdata;
pub mod volume_cleaner;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use log::{error, warn};

use machine_shared::k8s::node::{self, is_ready};
use machine_shared::machine::{
    Machine, MachineCondition, ANNOTATION_UNINITIALIZED, FINALIZER_DELETE_INSTANCE, FINALIZER_DELETE_NODE,
    LABEL_CONTROLLER,
};

use crate::util::controller_ctx::ControllerContext;
use crate::util::events;
use crate::util::ControllerError;
use ensure_instance::EnsureOutcome;

const DEFAULT_RESYNC: Duration = Duration::from_secs(5 * 60);
const NODE_MISSING_REQUEUE: Duration = Duration::from_secs(15);
const CLEANUP_NOT_DONE_REQUEUE: Duration = Duration::from_secs(10);
const DRAIN_PENDING_REQUEUE: Duration = Duration::from_secs(10);
const VOLUMES_PENDING_REQUEUE: Duration = Duration::from_secs(10);

const FIELD_MANAGER: &str = "machine-controller";

fn skips_sharding(machine: &Machine, shard_name: &str) -> bool {
    if shard_name.is_empty() {
        return false;
    }
    machine.labels().get(LABEL_CONTROLLER).map(String::as_str) != Some(shard_name)
}

/// Renders a minimal cluster-info kubeconfig pointing at this cluster's
/// apiserver, for embedding a bootstrap token into.
fn cluster_info_kubeconfig(ctx: &Arc<ControllerContext> ) -> String {
    let apiserver = ctx
        .config
        .bootstrap_apiserver_override
        .clone()
        .unwrap_or_else(|| "https://kubernetes.default.svc".to_string());
    format!(
        "apiVersion: v1\nkind: Config\nclusters:\n- name: default\n  cluster:\n    server: {apiserver}\n    insecure-skip-tls-verify: true\ncontexts:\n- name: default\n  context:\n    cluster: default\n    user: kubelet-bootstrap\ncurrent-context: default\n"
    )
}

/// Patches `Status` fields via a merge patch over the status subresource.
pub(crate) async fn patch_status(
    ctx: &Arc<ControllerContext>,
    namespace: &str,
    name: &str,
    status: serde_json::Value,
) -> Result<(), ControllerError> {
    let api: Box<dyn machine_shared::k8s::api::Api<Machine>> = ctx.client.namespaced(namespace);
    let patch = kube::api::Patch::Merge(serde_json::json!({ "status": status }));
    api.patch_status(name, &patch, &kube::api::PatchParams::default()).await?;
    Ok(())
}

async fn clear_terminal_error(ctx: &Arc<ControllerContext>, namespace: &str, name: &str) -> Result<(), ControllerError> {
    patch_status(
        ctx,
        namespace,
        name,
        serde_json::json!({ "errorReason": null, "errorMessage": null }),
    )
    .await
}

pub(crate) async fn stamp_terminal_error(
    ctx: &Arc<ControllerContext>,
    machine: &Machine,
    reason: &str,
    message: &str,
) -> Result<(), ControllerError> {
    let namespace = machine.namespace().unwrap_or_default();
    patch_status(
        ctx,
        &namespace,
        &machine.spec.name,
        serde_json::json!({ "errorReason": reason, "errorMessage": message }),
    )
    .await?;
    let recorder = events::recorder_for(ctx.kube_client.clone(), ctx.reporter.clone(), machine);
    events::publish_warning(&recorder, events::RECONCILING_ERROR, message.to_string()).await;
    Ok(())
}

/// §4.1a: cloud cleanup, run once a Machine is being deleted and the
/// instance finalizer is still present. Once the provider confirms the
/// instance is gone, runs OS-specific deregistration (e.g. RHEL
/// subscription unregister) and strips that plugin's finalizer before
/// reporting "gone" to the caller, so the instance finalizer is never
/// stripped ahead of it.
async fn cloud_cleanup(machine: &mut Machine, ctx: &Arc<ControllerContext>) -> Result<bool, ControllerError> {
    let provider = ctx.providers.for_name(&machine.spec.provider_spec.provider)?;
    let mctx = machine_provider::MachineContext {
        uid: machine.uid().unwrap_or_default(),
        name: machine.spec.name.clone(),
        namespace: machine.namespace().unwrap_or_default(),
        provider_config: machine.spec.provider_spec.value.clone(),
    };

    let gone = match provider.cleanup(&mctx).await {
        Ok(true) => true,
        Ok(false) => false,
        Err(machine_provider::ProviderError::NotFound) => true,
        Err(machine_provider::ProviderError::Terminal(msg)) => {
            stamp_terminal_error(ctx, machine, "CleanupFailed", &msg).await?;
            false
        }
        Err(machine_provider::ProviderError::Transient(e)) => return Err(ControllerError::Other(e)),
    };
    if !gone {
        return Ok(false);
    }

    let os_plugin = ctx.os_plugins.for_os(machine.spec.provider_spec.os.as_deref());
    if let Err(e) = os_plugin.deregister(&mctx).await {
        warn!("OS deregistration ({}) failed for {}: {e}", os_plugin.name(), mctx.name);
        return Ok(false);
    }
    if machine
        .finalizers()
        .iter()
        .any(|f| f == machine_provider::FINALIZER_REDHAT_SUBSCRIPTION)
    {
        let api = ctx.client.namespaced(&mctx.namespace);
        api.remove_finalizer(machine, machine_provider::FINALIZER_REDHAT_SUBSCRIPTION)
            .await?;
    }
    Ok(true)
}

async fn handle_deletion(machine: &mut Machine, ctx: &Arc<ControllerContext>) -> Result<Action, ControllerError> {
    let namespace = machine.namespace().unwrap_or_default();
    let api = ctx.client.namespaced(&namespace);
    let node_name = machine.status.as_ref().and_then(|s| s.node_ref.clone());

    let deletion_age = machine
        .meta()
        .deletion_timestamp
        .as_ref()
        .map(|t| chrono::Utc::now().signed_duration_since(t.0))
        .and_then(|d| d.to_std().ok())
        .unwrap_or_default();

    if let Some(node_name) = &node_name {
        if deletion_age <= ctx.config.skip_eviction_after {
            if let Ok(node) = node::find_node(node_name, ctx.kube_client.clone()).await {
                if !eviction::skips_eviction(&node)
                    && eviction::has_viable_target(node_name, &namespace, &machine.spec.name, ctx.kube_client.clone())
                        .await?
                {
                    let (evicted_something, blocked) =
                        eviction::drain(node_name, ctx.kube_client.clone()).await?;
                    if evicted_something || blocked {
                        return Ok(Action::requeue(DRAIN_PENDING_REQUEUE));
                    }
                }
            }
        }

        let (_deleted_something, volumes_free) =
            volume_cleaner::free_volumes(node_name, ctx.kube_client.clone()).await?;
        if !volumes_free {
            return Ok(Action::requeue(VOLUMES_PENDING_REQUEUE));
        }
    }

    let has_instance_finalizer = machine.finalizers().iter().any(|f| f == FINALIZER_DELETE_INSTANCE);
    if has_instance_finalizer {
        let gone = cloud_cleanup(machine, ctx).await?;
        if !gone {
            return Ok(Action::requeue(CLEANUP_NOT_DONE_REQUEUE));
        }
        api.remove_finalizer(machine, FINALIZER_DELETE_INSTANCE).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    if let Some(node_name) = &node_name {
        let nodes: kube::Api<k8s_openapi::api::core::v1::Node> = kube::Api::all(ctx.kube_client.clone());
        let _ = nodes.delete(node_name, &Default::default()).await;
    }

    if machine.finalizers().iter().any(|f| f == FINALIZER_DELETE_NODE) {
        api.remove_finalizer(machine, FINALIZER_DELETE_NODE).await?;
    }

    Ok(Action::await_change())
}

async fn handle_creation(machine: &mut Machine, ctx: &Arc<ControllerContext>) -> Result<Action, ControllerError> {
    let kubeconfig = cluster_info_kubeconfig(ctx);
    match ensure_instance::ensure_instance(machine, ctx, &kubeconfig).await {
        Ok(EnsureOutcome::Created(requeue)) => Ok(Action::requeue(requeue)),
        Ok(EnsureOutcome::Requeue(requeue)) => Ok(Action::requeue(requeue)),
        Ok(EnsureOutcome::Deleted) => Ok(Action::await_change()),
        Ok(EnsureOutcome::Bound(node_name)) => {
            let namespace = machine.namespace().unwrap_or_default();
            patch_status(
                ctx,
                &namespace,
                &machine.spec.name,
                serde_json::json!({ "nodeRef": node_name }),
            )
            .await?;
            Ok(Action::requeue(Duration::from_secs(1)))
        }
        Err(e) => {
            warn!("ensure-instance failed for {}: {e}", machine.spec.name);
            Err(e)
        }
    }
}

/// §4.1b: handling a not-Ready Node when the backing instance is confirmed
/// gone by the provider. Without a reliable signal that an external CCM
/// will clean the Node up on its own, we requeue and wait rather than
/// guess -- deleting the Machine here would violate "never delete a
/// Machine because its Node vanished".
async fn handle_not_ready_node(machine: &mut Machine, ctx: &Arc<ControllerContext>) -> Result<Action, ControllerError> {
    let provider = ctx.providers.for_name(&machine.spec.provider_spec.provider)?;
    let mctx = machine_provider::MachineContext {
        uid: machine.uid().unwrap_or_default(),
        name: machine.spec.name.clone(),
        namespace: machine.namespace().unwrap_or_default(),
        provider_config: machine.spec.provider_spec.value.clone(),
    };

    match provider.get(&mctx).await {
        Err(machine_provider::ProviderError::NotFound) => {
            // Instance is gone but the Node hasn't been reaped yet; give the
            // external CCM (or the next reconcile, once it clears NodeRef)
            // time to catch up.
            Ok(Action::requeue(DEFAULT_RESYNC))
        }
        _ => {
            // Instance still exists from the provider's perspective: treat
            // this like any other not-Ready node and let ensure-instance
            // re-run the correlator on the next pass.
            handle_creation(machine, ctx).await
        }
    }
}

async fn handle_reconciliation(
    machine: &mut Machine,
    node_name: &str,
    ctx: &Arc<ControllerContext>,
) -> Result<Action, ControllerError> {
    let namespace = machine.namespace().unwrap_or_default();

    let node = match node::find_node(node_name, ctx.kube_client.clone()).await {
        Ok(node) => node,
        Err(_) => {
            patch_status(ctx, &namespace, &machine.spec.name, serde_json::json!({ "nodeRef": null })).await?;
            return Ok(Action::requeue(NODE_MISSING_REQUEUE));
        }
    };

    if is_ready(&node) {
        clear_terminal_error(ctx, &namespace, &machine.spec.name).await?;

        let kubelet_version = node
            .status
            .as_ref()
            .and_then(|s| s.node_info.as_ref())
            .map(|info| info.kubelet_version.clone())
            .unwrap_or_default();

        patch_status(
            ctx,
            &namespace,
            &machine.spec.name,
            serde_json::json!({
                "versions": ensure_instance::mirror_kubelet_version(&kubelet_version),
                "conditions": [MachineCondition::ready(true)],
            }),
        )
        .await?;

        let mut annotations = BTreeMap::new();
        annotations.extend(machine.spec.annotations.clone());

        node::project_machine_fields(
            node_name,
            &machine.spec.labels,
            &annotations,
            &machine.spec.taints.iter().map(taint_to_k8s).collect::<Vec<_>>(),
            FIELD_MANAGER,
            ctx.kube_client.clone(),
        )
        .await?;
        let recorder = events::recorder_for(ctx.kube_client.clone(), ctx.reporter.clone(), machine);
        events::publish(
            &recorder,
            events::LABELS_ANNOTATIONS_TAINTS_UPDATED,
            format!("projected labels/annotations/taints onto node {node_name}"),
        )
        .await;

        if machine.spec.provider_id.is_none()
            && node.spec.as_ref().and_then(|s| s.provider_id.as_ref()).is_none()
        {
            node::ensure_provider_id(
                node_name,
                &format!(
                    "kubermatic://{}/{}",
                    machine.spec.provider_spec.provider,
                    machine.uid().unwrap_or_default()
                ),
                ctx.kube_client.clone(),
            )
            .await?;
            let recorder = events::recorder_for(ctx.kube_client.clone(), ctx.reporter.clone(), machine);
            events::publish(&recorder, events::PROVIDER_ID_UPDATED, "stamped synthetic ProviderID").await;
        }

        Ok(Action::requeue(DEFAULT_RESYNC))
    } else {
        patch_status(
            ctx,
            &namespace,
            &machine.spec.name,
            serde_json::json!({ "conditions": [MachineCondition::ready(false)] }),
        )
        .await?;
        handle_not_ready_node(machine, ctx).await
    }
}

fn taint_to_k8s(taint: &machine_shared::machine::MachineTaint) -> k8s_openapi::api::core::v1::Taint {
    k8s_openapi::api::core::v1::Taint {
        key: taint.key.clone(),
        value: if taint.value.is_empty() { None } else { Some(taint.value.clone()) },
        effect: taint.effect.clone(),
        time_added: None,
    }
}

/// Entry point handed to `kube::runtime::Controller::run`.
pub async fn reconcile(machine: Arc<Machine>, ctx: Arc<ControllerContext>) -> Result<Action, ControllerError> {
    if machine
        .annotations()
        .get(ANNOTATION_UNINITIALIZED)
        .is_some_and(|v| !v.is_empty())
    {
        return Ok(Action::await_change());
    }
    if skips_sharding(&machine, &ctx.config.shard_name) {
        return Ok(Action::await_change());
    }

    let mut machine = (*machine).clone();

    if machine.spec.name.is_empty() {
        let namespace = machine.namespace().unwrap_or_default();
        let api = ctx.client.namespaced(&namespace);
        machine.spec.name = machine.name_any();
        machine = api.apply(machine, FIELD_MANAGER).await?;
    }

    if machine.meta().deletion_timestamp.is_some() {
        return handle_deletion(&mut machine, &ctx).await;
    }

    match machine.status.as_ref().and_then(|s| s.node_ref.clone()) {
        None => handle_creation(&mut machine, &ctx).await,
        Some(node_name) => handle_reconciliation(&mut machine, &node_name, &ctx).await,
    }
}

/// `kube::runtime::Controller::run`'s error-policy callback.
pub fn error_policy(machine: Arc<Machine>, err: &ControllerError, _ctx: Arc<ControllerContext>) -> Action {
    error!("reconcile of machine {} failed: {err}", machine.name_any());
    Action::requeue(Duration::from_secs(30))
}
