use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use kube::runtime::events::Reporter;
use kube::Client;

use machine_provider::{OsPluginRegistry, ProviderRegistry};
use machine_shared::config::ControllerConfig;
use machine_shared::k8s::api::IntoApi;
use machine_shared::machine::{Machine, MachineDeployment, MachineSet};

/// Narrow capability set the reconciler needs from a Kubernetes client for
/// the objects it directly manages and unit-tests against mocks. Objects
/// the reconciler only reads through plain helper functions (Node, Pod,
/// Secret, VolumeAttachment) go through the raw `kube::Client` in
/// `ControllerContext::kube_client` instead -- `machine_shared::k8s::{node,
/// pod, secret, volume_attachment}` already take a `Client` directly.
pub trait ControllerKubeClient: IntoApi<Machine> + IntoApi<MachineSet> + IntoApi<MachineDeployment> {}

impl<T: IntoApi<Machine> + IntoApi<MachineSet> + IntoApi<MachineDeployment>> ControllerKubeClient for T {}

/// Reverse index from Machine UID to (namespace, name), maintained as a
/// side effect of binding a Node so the node-watcher mapper can translate
/// a Node event into the Machine that owns it without an extra API call.
/// Ownership itself stays one-directional via the `owned-by` label on the
/// Node; this index is a cache, never a pointer.
#[derive(Default)]
pub struct MachineIndex {
    by_uid: RwLock<HashMap<String, (String, String)>>,
}

impl MachineIndex {
    pub fn record(&self, uid: &str, namespace: &str, name: &str) {
        self.by_uid
            .write()
            .unwrap()
            .insert(uid.to_string(), (namespace.to_string(), name.to_string()));
    }

    pub fn lookup(&self, uid: &str) -> Option<(String, String)> {
        self.by_uid.read().unwrap().get(uid).cloned()
    }
}

/// Last-observed `Ready` condition per node name, so the node watcher can
/// tell "ready condition changed" apart from "node resynced with no
/// change" -- kube's watcher delivers both as `Event::Apply`.
#[derive(Default)]
pub struct NodeReadyCache {
    ready: RwLock<HashMap<String, bool>>,
}

impl NodeReadyCache {
    /// Records the node's current readiness, returning `true` if it
    /// differs from what was last recorded (or this is the first time the
    /// node has been seen).
    pub fn record_and_check_change(&self, node_name: &str, is_ready: bool) -> bool {
        let mut guard = self.ready.write().unwrap();
        match guard.insert(node_name.to_string(), is_ready) {
            Some(previous) => previous != is_ready,
            None => true,
        }
    }

    pub fn forget(&self, node_name: &str) {
        self.ready.write().unwrap().remove(node_name);
    }
}

pub struct ControllerContext {
    /// Mockable client scoped to the CRDs the reconciler writes directly.
    pub client: Arc<dyn ControllerKubeClient>,
    /// Raw client for the plain `machine_shared::k8s` helper functions and
    /// for constructing provider instances.
    pub kube_client: Client,
    pub providers: Arc<ProviderRegistry>,
    pub os_plugins: Arc<OsPluginRegistry>,
    pub config: ControllerConfig,
    pub reporter: Reporter,
    pub machine_index: Arc<MachineIndex>,
    pub node_ready_cache: Arc<NodeReadyCache>,
}

impl ControllerContext {
    pub fn new(
        client: Arc<dyn ControllerKubeClient>,
        kube_client: Client,
        providers: Arc<ProviderRegistry>,
        config: ControllerConfig,
    ) -> Self {
        ControllerContext {
            client,
            kube_client,
            providers,
            os_plugins: Arc::new(OsPluginRegistry::new()),
            config,
            reporter: "machine-controller".into(),
            machine_index: Arc::new(MachineIndex::default()),
            node_ready_cache: Arc::new(NodeReadyCache::default()),
        }
    }
}
