use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::provider::Provider;

/// Dispatches reconciler calls to the correct backend `Provider` by name.
/// Every Machine names its provider in `providerSpec.provider`; there is no
/// cluster-wide default the way `DriverRegistry` has one for clouds, since a
/// Machine without a resolvable provider is a configuration error.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        ProviderRegistry {
            providers: HashMap::new(),
        }
    }

    /// Register a provider under its own name. Returns `&mut self` for
    /// chaining multiple registrations at startup.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> &mut Self {
        self.providers.insert(provider.name().to_string(), provider);
        self
    }

    pub fn for_name(&self, name: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::terminal(format!("no provider registered for {name}")))
    }

    pub fn active_providers(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{Instance, InstanceAddress, InstanceStatus};
    use crate::provider::MachineContext;
    use async_trait::async_trait;

    struct Dummy;
    struct DummyInstance;
    impl Instance for DummyInstance {
        fn id(&self) -> String {
            "i-1".into()
        }
        fn name(&self) -> String {
            "dummy".into()
        }
        fn provider_id(&self) -> String {
            String::new()
        }
        fn addresses(&self) -> Vec<InstanceAddress> {
            vec![]
        }
        fn status(&self) -> InstanceStatus {
            InstanceStatus::Running
        }
    }

    #[async_trait]
    impl Provider for Dummy {
        fn name(&self) -> &'static str {
            "dummy"
        }
        async fn get(&self, _m: &MachineContext) -> crate::error::Result<Box<dyn Instance>> {
            Ok(Box::new(DummyInstance))
        }
        async fn create(
            &self,
            _m: &MachineContext,
            _u: &str,
        ) -> crate::error::Result<Box<dyn Instance>> {
            Ok(Box::new(DummyInstance))
        }
        async fn cleanup(&self, _m: &MachineContext) -> crate::error::Result<bool> {
            Ok(true)
        }
        fn validate(&self, _m: &MachineContext) -> crate::error::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn resolves_registered_provider() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(Dummy));
        assert!(registry.for_name("dummy").is_ok());
        assert!(registry.for_name("missing").is_err());
        assert_eq!(registry.active_providers(), vec!["dummy".to_string()]);
    }
}
