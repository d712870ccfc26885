//! The `Machine`, `MachineSet` and `MachineDeployment` custom resources.
//!
//! Modelled the way `akri.sh`'s `Configuration`/`Instance` CRDs were: a
//! `#[derive(CustomResource)]` spec type plus a hand-written status type,
//! registered with server-side-apply in mind (every writer uses a named
//! field manager).

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const API_GROUP: &str = "machine.k8s.io";
pub const API_VERSION: &str = "v1alpha1";

/// Annotation that freezes a Machine: when present (any value), the
/// reconciler performs no work on it.
pub const ANNOTATION_UNINITIALIZED: &str = "machine-controller.kubermatic.io/initializers";
/// Label used to shard Machines across multiple controller-manager replicas.
pub const LABEL_CONTROLLER: &str = "machine.k8s.io/controller";
/// Label stamped on a Node naming the Machine UID that owns it.
pub const LABEL_OWNED_BY: &str = "machine-controller/owned-by";
/// Label mirrored onto owned Nodes for cluster-autoscaler consumption.
pub const LABEL_CLUSTER_AUTOSCALER: &str = "cluster.k8s.io/machine";
/// Annotation carrying the MachineDeployment revision on external bootstrap secrets.
pub const ANNOTATION_MACHINE_DEPLOYMENT_REVISION: &str = "machine-deployment-revision";

pub const FINALIZER_DELETE_INSTANCE: &str = "machine-delete-finalizer";
pub const FINALIZER_DELETE_NODE: &str = "machine-node-delete-finalizer";

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "machine.k8s.io",
    version = "v1alpha1",
    kind = "Machine",
    namespaced
)]
#[kube(status = "MachineStatus")]
#[kube(apiextensions = "v1")]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// The machine's name, mirrored from `metadata.name` when a
    /// `generateName`-created object first picks one up.
    #[serde(default)]
    pub name: String,
    /// Opaque, provider-specific configuration blob (cloud credentials
    /// reference, instance type, region, etc). Interpreted only by the
    /// provider named in `provider_spec.provider`.
    pub provider_spec: ProviderSpec,
    /// Desired kubelet version, propagated into userdata.
    #[serde(default)]
    pub versions: MachineVersionInfo,
    /// Labels to idempotently project onto the bound Node.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotations to idempotently project onto the bound Node.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Taints to idempotently project onto the bound Node.
    #[serde(default)]
    pub taints: Vec<MachineTaint>,
    /// When set, this is used verbatim as the Node's `spec.providerID`
    /// instead of one synthesized by the controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    pub provider: String,
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineVersionInfo {
    #[serde(default)]
    pub kubelet: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineTaint {
    pub key: String,
    #[serde(default)]
    pub value: String,
    pub effect: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_ref: Option<String>,
    #[serde(default)]
    pub addresses: Vec<MachineAddress>,
    #[serde(default)]
    pub versions: MachineVersionInfo,
    #[serde(default)]
    pub conditions: Vec<MachineCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<Time>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct MachineAddress {
    pub address_type: String,
    pub address: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct MachineCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub const CONDITION_NODE_READY: &str = "NodeReady";

/// Owner-chain-only CRDs: the reconciler never mutates these itself, it
/// only walks `ownerReferences` up to find a revision or a replacement
/// policy.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "machine.k8s.io",
    version = "v1alpha1",
    kind = "MachineSet",
    namespaced
)]
#[kube(apiextensions = "v1")]
#[serde(rename_all = "camelCase")]
pub struct MachineSetSpec {
    #[serde(default)]
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<MachineSpec>,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "machine.k8s.io",
    version = "v1alpha1",
    kind = "MachineDeployment",
    namespaced
)]
#[kube(apiextensions = "v1")]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentSpec {
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub replicas: i32,
}

impl MachineCondition {
    pub fn ready(status: bool) -> Self {
        MachineCondition {
            condition_type: CONDITION_NODE_READY.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            last_transition_time: None,
            reason: None,
            message: None,
        }
    }
}
