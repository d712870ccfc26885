//! OS-specific plugin capability (§4.1 step 2, §4.1a deregistration).
//!
//! Mirrors the cloud `Provider` capability set but is keyed by
//! `Machine.spec.providerSpec.os` rather than by cloud name. The only
//! operation the core needs from an OS plugin beyond userdata templating
//! (handled entirely in `controller::reconcile::userdata`) is the one
//! `Provider::cleanup` can't do on its own: subscription/registration
//! teardown for OS images that require it. RHEL's RHSM client is the
//! motivating case and stays an external collaborator -- this module
//! defines only the contract a plugin dispatches through, never the
//! subscription-manager wire protocol itself.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::provider::MachineContext;

#[async_trait]
pub trait OsPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs once per Machine deletion, after the cloud instance is
    /// confirmed gone and before this plugin's finalizer (if it carries
    /// one) is stripped. No-op for OSes that need no deregistration.
    async fn deregister(&self, _machine: &MachineContext) -> Result<()> {
        Ok(())
    }
}

/// The plugin used for any OS that names no specific deregistration step.
pub struct NoopOsPlugin;

#[async_trait]
impl OsPlugin for NoopOsPlugin {
    fn name(&self) -> &'static str {
        "generic"
    }
}

/// Dispatches to the OS plugin named by `providerSpec.os`, falling back to
/// [`NoopOsPlugin`] for an unset or unregistered name -- unlike
/// `ProviderRegistry`, an unrecognised OS is not a configuration error,
/// since most Machines name no OS plugin at all.
pub struct OsPluginRegistry {
    plugins: HashMap<String, Arc<dyn OsPlugin>>,
    default: Arc<dyn OsPlugin>,
}

impl Default for OsPluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OsPluginRegistry {
    pub fn new() -> Self {
        OsPluginRegistry {
            plugins: HashMap::new(),
            default: Arc::new(NoopOsPlugin),
        }
    }

    pub fn register(&mut self, plugin: Arc<dyn OsPlugin>) -> &mut Self {
        self.plugins.insert(plugin.name().to_string(), plugin);
        self
    }

    pub fn for_os(&self, os: Option<&str>) -> Arc<dyn OsPlugin> {
        match os {
            Some(name) => self.plugins.get(name).cloned().unwrap_or_else(|| self.default.clone()),
            None => self.default.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker;
    #[async_trait]
    impl OsPlugin for Marker {
        fn name(&self) -> &'static str {
            "marker"
        }
    }

    #[test]
    fn unregistered_os_falls_back_to_noop_rather_than_erroring() {
        let registry = OsPluginRegistry::new();
        assert_eq!(registry.for_os(Some("rhel")).name(), "generic");
        assert_eq!(registry.for_os(None).name(), "generic");
    }

    #[test]
    fn registered_os_resolves_to_its_own_plugin() {
        let mut registry = OsPluginRegistry::new();
        registry.register(Arc::new(Marker));
        assert_eq!(registry.for_os(Some("marker")).name(), "marker");
    }
}
