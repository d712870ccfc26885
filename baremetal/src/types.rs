//! Declarative object model for the Tinkerbell-family bare-metal driver:
//! `Hardware`, `Template`, `Workflow`. These live on a (possibly separate)
//! workflow cluster whose kubeconfig is supplied as plugin configuration,
//! so they are registered here rather than in `machine-shared`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const LABEL_HARDWARE: &str = "machine-baremetal.k8s.io/hardware";

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "tinkerbell.org",
    version = "v1alpha1",
    kind = "Hardware",
    status = "HardwareStatus"
)]
#[kube(apiextensions = "v1")]
#[serde(rename_all = "camelCase")]
pub struct HardwareSpec {
    pub interfaces: Vec<HardwareInterface>,
    pub disks: Vec<HardwareDisk>,
    /// Machine UID currently occupying this hardware; empty when unclaimed.
    #[serde(default)]
    pub instance_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HardwareInterface {
    pub mac: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub netmask: String,
    #[serde(default)]
    pub gateway: String,
    #[serde(default)]
    pub name_servers: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HardwareDisk {
    pub device: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum HardwareState {
    Unknown,
    Staged,
    Provisioned,
    Decommissioned,
}

impl Default for HardwareState {
    fn default() -> Self {
        HardwareState::Unknown
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HardwareStatus {
    #[serde(default)]
    pub state: HardwareState,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "tinkerbell.org",
    version = "v1alpha1",
    kind = "Template",
    namespaced
)]
#[kube(apiextensions = "v1")]
#[serde(rename_all = "camelCase")]
pub struct TemplateSpec {
    /// Opaque provisioning recipe body (action list), passed through
    /// unchanged; this driver never interprets it.
    pub data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum WorkflowState {
    Pending,
    Running,
    Success,
    Timeout,
    Failed,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "tinkerbell.org",
    version = "v1alpha1",
    kind = "Workflow",
    namespaced,
    status = "WorkflowStatus"
)]
#[kube(apiextensions = "v1")]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    pub template_ref: String,
    pub hardware_ref: String,
    #[serde(default)]
    pub hardware_map: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<WorkflowState>,
}
