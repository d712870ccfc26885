//! Owner-chain traversal: Machine -> MachineSet -> MachineDeployment.
//!
//! The reconciler never mutates these objects, it only reads them to
//! answer two questions: "is this Machine owned by a MachineSet" (the
//! join-cluster-timeout deletion gate) and "what MachineDeployment, at
//! what revision, produced this Machine" (the external-bootstrap revision
//! gate).

use std::sync::Arc;

use kube::ResourceExt;

use machine_shared::machine::{Machine, MachineDeployment, MachineSet};

use crate::util::controller_ctx::ControllerContext;
use crate::util::ControllerError;

/// Name of the owning MachineSet, if any.
pub fn machine_set_owner_name(machine: &Machine) -> Option<String> {
    machine
        .owner_references()
        .iter()
        .find(|o| o.kind == "MachineSet")
        .map(|o| o.name.clone())
}

fn machine_deployment_owner_name(machine_set: &MachineSet) -> Option<String> {
    machine_set
        .owner_references()
        .iter()
        .find(|o| o.kind == "MachineDeployment")
        .map(|o| o.name.clone())
}

/// Looks up the owning MachineSet, if this Machine has one.
pub async fn machine_set_owner(
    machine: &Machine,
    ctx: &Arc<ControllerContext>,
) -> Result<Option<MachineSet>, ControllerError> {
    let Some(name) = machine_set_owner_name(machine) else {
        return Ok(None);
    };
    let api = ctx.client.namespaced(&machine.namespace().unwrap_or_default());
    Ok(api.get(&name).await?)
}

/// Walks Machine -> MachineSet -> MachineDeployment, returning the
/// MachineDeployment if the full chain resolves.
pub async fn machine_deployment_owner(
    machine: &Machine,
    ctx: &Arc<ControllerContext>,
) -> Result<Option<MachineDeployment>, ControllerError> {
    let Some(machine_set) = machine_set_owner(machine, ctx).await? else {
        return Ok(None);
    };
    let Some(md_name) = machine_deployment_owner_name(&machine_set) else {
        return Ok(None);
    };
    let api = ctx.client.namespaced(&machine.namespace().unwrap_or_default());
    Ok(api.get(&md_name).await?)
}
