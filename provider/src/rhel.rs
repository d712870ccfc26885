//! The RHEL OS plugin: the one concrete deregistration path named in the
//! surrounding spec (§4.1a, §6). `RhsmClient` is the RHSM
//! subscription-manager contract itself -- an out-of-scope external
//! collaborator; this crate defines only the trait the core dispatches
//! through, never subscription-manager's D-Bus/HTTP protocol.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::os_plugin::OsPlugin;
use crate::provider::MachineContext;

/// Finalizer gating Node/object removal until a RHEL Machine's
/// subscription has been unregistered.
pub const FINALIZER_REDHAT_SUBSCRIPTION: &str = "redhat-subscription-finalizer";

/// The narrow contract the RHSM client needs to satisfy. Implemented by an
/// out-of-scope collaborator that actually speaks to
/// `subscription-manager`; nothing in this crate calls it.
#[async_trait]
pub trait RhsmClient: Send + Sync {
    async fn unregister(&self, machine_name: &str) -> Result<()>;
}

pub struct RhelOsPlugin {
    client: Arc<dyn RhsmClient>,
}

impl RhelOsPlugin {
    pub fn new(client: Arc<dyn RhsmClient>) -> Self {
        RhelOsPlugin { client }
    }
}

#[async_trait]
impl OsPlugin for RhelOsPlugin {
    fn name(&self) -> &'static str {
        "rhel"
    }

    async fn deregister(&self, machine: &MachineContext) -> Result<()> {
        self.client.unregister(&machine.name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RhsmClient for RecordingClient {
        async fn unregister(&self, _machine_name: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn deregister_delegates_to_the_rhsm_client() {
        let client = Arc::new(RecordingClient { calls: AtomicUsize::new(0) });
        let plugin = RhelOsPlugin::new(client.clone());
        let mctx = MachineContext {
            uid: "u1".into(),
            name: "m1".into(),
            namespace: "default".into(),
            provider_config: serde_json::json!({}),
        };
        plugin.deregister(&mctx).await.unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }
}
