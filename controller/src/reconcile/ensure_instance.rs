//! Ensure-instance (§4.5): the creation branch and the existing-instance
//! correlation/binding branch. Runs whenever a Machine has no `NodeRef` yet.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::ResourceExt;
use log::info;

use machine_provider::{MachineContext, ProviderError};
use machine_shared::k8s::node::{self, ensure_provider_id};
use machine_shared::machine::{Machine, MachineAddress, MachineVersionInfo, LABEL_CLUSTER_AUTOSCALER, LABEL_OWNED_BY};

use super::correlator::{correlate, Correlation};
use super::owner_chain::machine_set_owner_name;
use super::userdata::UserdataError;
use crate::util::controller_ctx::ControllerContext;
use crate::util::events;
use crate::util::ControllerError;

/// What the reconciler should do next, once ensure-instance returns.
pub enum EnsureOutcome {
    /// Instance just created; re-check after this long to catch a silent
    /// creation failure.
    Created(Duration),
    /// Matched to a Node and bound; the reconciler still owes this Node a
    /// `Status.NodeRef` write so the next reconcile takes the
    /// reconciliation branch instead of ensure-instance again.
    Bound(String),
    /// Instance exists but has no addresses yet, or has addresses but no
    /// Node matched; requeue after this long.
    Requeue(Duration),
    /// The Machine was deleted because its MachineSet-owned join window
    /// expired; nothing further to do this reconcile.
    Deleted,
}

const CORRELATOR_ADDRESS_WAIT: Duration = Duration::from_secs(15);
const CREATION_RECHECK: Duration = Duration::from_secs(30);
const NO_MATCH_RECHECK: Duration = Duration::from_secs(30);
const EXTERNAL_SECRET_NOT_READY_RECHECK: Duration = Duration::from_secs(3);

fn machine_context(machine: &Machine) -> MachineContext {
    MachineContext {
        uid: machine.uid().unwrap_or_default(),
        name: machine.spec.name.clone(),
        namespace: machine.namespace().unwrap_or_default(),
        provider_config: machine.spec.provider_spec.value.clone(),
    }
}

/// Synthetic `Node.Spec.ProviderID` used when no in-tree/external cloud
/// provider is stamping a real one.
fn synthetic_provider_id(provider_name: &str, machine_uid: &str) -> String {
    format!("kubermatic://{provider_name}/{machine_uid}")
}

async fn handle_creation(
    machine: &mut Machine,
    mctx: &MachineContext,
    provider: &Arc<dyn machine_provider::Provider>,
    ctx: &Arc<ControllerContext>,
    cluster_info_kubeconfig: &str,
) -> Result<EnsureOutcome, ControllerError> {
    let cloud_config = provider.get_cloud_config(mctx);
    let userdata = match super::userdata::assemble(machine, cluster_info_kubeconfig, &cloud_config, ctx).await {
        Ok(userdata) => userdata,
        Err(UserdataError::SecretNotReady) => {
            // cloud-config secret not produced yet by the external
            // bootstrap operator; this is expected, not an error.
            return Ok(EnsureOutcome::Requeue(EXTERNAL_SECRET_NOT_READY_RECHECK));
        }
        Err(UserdataError::Controller(ce)) => return Err(ce),
        Err(other) => return Err(ControllerError::Other(anyhow::anyhow!(other))),
    };

    let api = ctx.client.namespaced(&mctx.namespace);
    api.add_finalizer(machine, machine_shared::machine::FINALIZER_DELETE_INSTANCE)
        .await?;
    api.add_finalizer(machine, machine_shared::machine::FINALIZER_DELETE_NODE)
        .await?;
    if machine.spec.provider_spec.os.as_deref() == Some("rhel") {
        api.add_finalizer(machine, machine_provider::FINALIZER_REDHAT_SUBSCRIPTION)
            .await?;
    }

    match provider.create(mctx, &userdata).await {
        Ok(_instance) => {
            let recorder = events::recorder_for(ctx.kube_client.clone(), ctx.reporter.clone(), machine);
            events::publish(&recorder, events::CREATED, format!("created instance for {}", mctx.name)).await;
            Ok(EnsureOutcome::Created(CREATION_RECHECK))
        }
        Err(ProviderError::Terminal(msg)) => {
            super::stamp_terminal_error(ctx, machine, "CreateFailed", &msg).await?;
            Err(ControllerError::Other(anyhow::anyhow!(
                "terminal error creating instance for {}: {msg}",
                mctx.name
            )))
        }
        Err(ProviderError::Transient(e)) => Err(ControllerError::Other(e)),
        Err(ProviderError::NotFound) => Err(ControllerError::Other(anyhow::anyhow!(
            "provider reported instance not found immediately after create for {}",
            mctx.name
        ))),
    }
}

async fn bind_node(machine: &Machine, node_name: &str, ctx: &Arc<ControllerContext>) -> Result<(), ControllerError> {
    let uid = machine.uid().unwrap_or_default();
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_OWNED_BY.to_string(), uid.clone());
    labels.insert(
        LABEL_CLUSTER_AUTOSCALER.to_string(),
        format!("{}/{}", machine.namespace().unwrap_or_default(), machine.spec.name),
    );

    node::project_machine_fields(
        node_name,
        &labels,
        &BTreeMap::new(),
        &[],
        "machine-controller",
        ctx.kube_client.clone(),
    )
    .await?;

    ctx.machine_index.record(
        &uid,
        &machine.namespace().unwrap_or_default(),
        &machine.spec.name,
    );

    Ok(())
}

async fn handle_existing(
    machine: &Machine,
    mctx: &MachineContext,
    instance: Box<dyn machine_provider::Instance>,
    ctx: &Arc<ControllerContext>,
) -> Result<EnsureOutcome, ControllerError> {
    let recorder = events::recorder_for(ctx.kube_client.clone(), ctx.reporter.clone(), machine);
    events::publish(&recorder, events::INSTANCE_FOUND, format!("found instance for {}", mctx.name)).await;

    let addresses: Vec<MachineAddress> = machine_provider::sorted_addresses(instance.addresses())
        .into_iter()
        .map(|a| MachineAddress {
            address_type: a.address_type,
            address: a.address,
        })
        .collect();
    super::patch_status(
        ctx,
        &mctx.namespace,
        &mctx.name,
        serde_json::json!({ "addresses": addresses }),
    )
    .await?;

    let provider_name = machine.spec.provider_spec.provider.clone();
    let synthetic_id = machine.spec.provider_id.is_none();

    let nodes_api: kube::Api<k8s_openapi::api::core::v1::Node> = kube::Api::all(ctx.kube_client.clone());
    let nodes = nodes_api.list(&Default::default()).await?;

    match correlate(instance.as_ref(), &provider_name, &nodes.items) {
        Correlation::NoAddressesYet => Ok(EnsureOutcome::Requeue(CORRELATOR_ADDRESS_WAIT)),
        Correlation::NoMatch => Ok(EnsureOutcome::Requeue(NO_MATCH_RECHECK)),
        Correlation::Matched(node_name) => {
            if synthetic_id {
                ensure_provider_id(
                    &node_name,
                    &synthetic_provider_id(&provider_name, &mctx.uid),
                    ctx.kube_client.clone(),
                )
                .await?;
            }
            bind_node(machine, &node_name, ctx).await?;
            info!("machine {} bound to node {}", mctx.name, node_name);
            Ok(EnsureOutcome::Bound(node_name))
        }
    }
}

/// Deletes a Machine whose join window has expired, per the join-timeout
/// rule: only for MachineSet-owned Machines, never otherwise.
async fn maybe_join_timeout(
    machine: &Machine,
    mctx: &MachineContext,
    ctx: &Arc<ControllerContext>,
) -> Result<Option<EnsureOutcome>, ControllerError> {
    let Some(timeout) = ctx.config.join_cluster_timeout else {
        return Ok(None);
    };
    if machine_set_owner_name(machine).is_none() {
        return Ok(None);
    }
    let created = machine
        .creation_timestamp()
        .map(|t| t.0)
        .unwrap_or_else(Utc::now);
    let age = Utc::now().signed_duration_since(created);
    if age.to_std().unwrap_or_default() <= timeout {
        return Ok(None);
    }

    let api = ctx.client.namespaced(&mctx.namespace);
    api.delete(&mctx.name).await?;
    info!("machine {} deleted after join-cluster-timeout", mctx.name);
    Ok(Some(EnsureOutcome::Deleted))
}

/// Runs the creation/correlation branch for a Machine with no `NodeRef`.
pub async fn ensure_instance(
    machine: &mut Machine,
    ctx: &Arc<ControllerContext>,
    cluster_info_kubeconfig: &str,
) -> Result<EnsureOutcome, ControllerError> {
    let mctx = machine_context(machine);
    let provider = ctx.providers.for_name(&machine.spec.provider_spec.provider)?;

    match provider.get(&mctx).await {
        Err(ProviderError::NotFound) => {
            handle_creation(machine, &mctx, &provider, ctx, cluster_info_kubeconfig).await
        }
        Err(ProviderError::Terminal(msg)) => {
            super::stamp_terminal_error(ctx, machine, "GetFailed", &msg).await?;
            Err(ControllerError::Other(anyhow::anyhow!(
                "terminal error looking up instance for {}: {msg}",
                mctx.name
            )))
        }
        Err(ProviderError::Transient(e)) => Err(ControllerError::Other(e)),
        Ok(instance) => {
            let outcome = handle_existing(machine, &mctx, instance, ctx).await?;
            if matches!(outcome, EnsureOutcome::Requeue(_)) {
                if let Some(timeout_outcome) = maybe_join_timeout(machine, &mctx, ctx).await? {
                    return Ok(timeout_outcome);
                }
            }
            Ok(outcome)
        }
    }
}

/// Mirrors the bound Node's kubelet version onto the Machine's status, as
/// done once a Node is found Ready in the reconciliation branch.
pub fn mirror_kubelet_version(node_kubelet_version: &str) -> MachineVersionInfo {
    MachineVersionInfo {
        kubelet: node_kubelet_version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesizes_provider_id_from_provider_name_and_uid() {
        assert_eq!(
            synthetic_provider_id("aws", "abc-123"),
            "kubermatic://aws/abc-123"
        );
    }

    #[test]
    fn mirrors_kubelet_version_verbatim() {
        assert_eq!(mirror_kubelet_version("1.28.4").kubelet, "1.28.4");
    }
}
