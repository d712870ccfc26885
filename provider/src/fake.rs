//! An in-memory provider used by controller tests, in the spirit of
//! `nclav_driver::local::LocalDriver`: no network calls, deterministic
//! state transitions driven entirely by the calling test.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{ProviderError, Result};
use crate::instance::{Instance, InstanceAddress, InstanceStatus};
use crate::provider::{MachineContext, Provider};

#[derive(Clone)]
pub struct FakeInstance {
    pub id: String,
    pub name: String,
    pub provider_id: String,
    pub addresses: Vec<InstanceAddress>,
    pub status: InstanceStatus,
}

impl Instance for FakeInstance {
    fn id(&self) -> String {
        self.id.clone()
    }
    fn name(&self) -> String {
        self.name.clone()
    }
    fn provider_id(&self) -> String {
        self.provider_id.clone()
    }
    fn addresses(&self) -> Vec<InstanceAddress> {
        self.addresses.clone()
    }
    fn status(&self) -> InstanceStatus {
        self.status
    }
}

#[derive(Default)]
pub struct FakeProvider {
    instances: Mutex<HashMap<String, FakeInstance>>,
    /// How many `cleanup` calls an instance must receive before it reports
    /// "completely gone" -- used to exercise the cloud-cleanup ordering
    /// property.
    pub cleanup_calls_required: Mutex<HashMap<String, u32>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, machine_uid: &str, instance: FakeInstance) {
        self.instances
            .lock()
            .unwrap()
            .insert(machine_uid.to_string(), instance);
    }

    pub fn require_cleanup_calls(&self, machine_uid: &str, n: u32) {
        self.cleanup_calls_required
            .lock()
            .unwrap()
            .insert(machine_uid.to_string(), n);
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn get(&self, machine: &MachineContext) -> Result<Box<dyn Instance>> {
        self.instances
            .lock()
            .unwrap()
            .get(&machine.uid)
            .cloned()
            .map(|i| Box::new(i) as Box<dyn Instance>)
            .ok_or(ProviderError::NotFound)
    }

    async fn create(&self, machine: &MachineContext, _userdata: &str) -> Result<Box<dyn Instance>> {
        let instance = FakeInstance {
            id: format!("fake-{}", machine.uid),
            name: machine.name.clone(),
            provider_id: format!("fake:///{}", machine.uid),
            addresses: vec![InstanceAddress {
                address_type: "InternalIP".to_string(),
                address: "10.0.0.1".to_string(),
            }],
            status: InstanceStatus::Running,
        };
        self.instances
            .lock()
            .unwrap()
            .insert(machine.uid.clone(), instance.clone());
        Ok(Box::new(instance))
    }

    async fn cleanup(&self, machine: &MachineContext) -> Result<bool> {
        let mut required = self.cleanup_calls_required.lock().unwrap();
        let remaining = required.entry(machine.uid.clone()).or_insert(0);
        if *remaining > 0 {
            *remaining -= 1;
            return Ok(false);
        }
        self.instances.lock().unwrap().remove(&machine.uid);
        Ok(true)
    }

    fn validate(&self, _machine: &MachineContext) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(uid: &str) -> MachineContext {
        MachineContext {
            uid: uid.to_string(),
            name: "m".to_string(),
            namespace: "default".to_string(),
            provider_config: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn get_not_found_before_create() {
        let provider = FakeProvider::new();
        let err = provider.get(&ctx("u1")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn cleanup_requires_configured_calls() {
        let provider = FakeProvider::new();
        provider.create(&ctx("u1"), "").await.unwrap();
        provider.require_cleanup_calls("u1", 2);
        assert!(!provider.cleanup(&ctx("u1")).await.unwrap());
        assert!(!provider.cleanup(&ctx("u1")).await.unwrap());
        assert!(provider.cleanup(&ctx("u1")).await.unwrap());
        assert!(provider.get(&ctx("u1")).await.is_err());
    }
}
