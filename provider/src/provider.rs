use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;
use crate::instance::Instance;

/// Identity a Provider needs to find/create/destroy the instance backing a
/// single Machine. Provider implementations only see this, never the CRD
/// type itself, so the capability set stays decoupled from `machine-shared`.
#[derive(Debug, Clone)]
pub struct MachineContext {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    /// The Machine's `providerSpec.value`, opaque to everything but the
    /// resolved provider.
    pub provider_config: Value,
}

/// The capability set every cloud/bare-metal backend implements. Named and
/// shaped the way `nclav_driver::Driver` names its enclave lifecycle: one
/// mutating verb pair per resource, plus read-only accessors.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Looks up the instance backing this Machine. `Err(NotFound)` drives
    /// the reconciler's creation branch.
    async fn get(&self, machine: &MachineContext) -> Result<Box<dyn Instance>>;

    /// Creates the instance, passing the already-assembled userdata
    /// through unchanged.
    async fn create(&self, machine: &MachineContext, userdata: &str) -> Result<Box<dyn Instance>>;

    /// Tears down the instance. Returns `true` once the cloud side
    /// confirms it is completely gone; `false` means "still tearing down,
    /// call again later".
    async fn cleanup(&self, machine: &MachineContext) -> Result<bool>;

    /// Validates `provider_config` without talking to the cloud.
    fn validate(&self, machine: &MachineContext) -> Result<()>;

    /// Cloud-init/ignition fragment the provider wants merged into
    /// userdata (e.g. cloud-specific mount units). Empty by default.
    fn get_cloud_config(&self, _machine: &MachineContext) -> String {
        String::new()
    }

    /// Rewrites a stored instance UID after out-of-band migration (e.g.
    /// moving a VM between projects). No-op by default.
    async fn migrate_uid(&self, _old_uid: &str, _new_uid: &str) -> Result<()> {
        Ok(())
    }

    /// Defaults the provider wants applied to a Machine before it is first
    /// reconciled (e.g. a default instance type). No-op by default.
    fn add_defaults(&self, _machine: &MachineContext) -> HashMap<String, String> {
        HashMap::new()
    }
}
