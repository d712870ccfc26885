use kube::Client;

pub mod api;
pub mod node;
pub mod pod;
pub mod secret;
pub mod volume_attachment;

pub const NODE_SELECTOR_OP_IN: &str = "In";
pub const OBJECT_NAME_FIELD: &str = "metadata.name";
pub const ERROR_NOT_FOUND: u16 = 404;
pub const ERROR_CONFLICT: u16 = 409;
pub const ERROR_TOO_MANY_REQUESTS: u16 = 429;

/// Thin wrapper adapting a live `kube::Client` to `k8s::api::IntoApi`.
///
/// Kept distinct from `kube::Client` itself (which also implements
/// `IntoApi` directly) so call sites can depend on `KubeImpl` when they
/// want a concrete, constructible type rather than the trait.
#[derive(Clone)]
pub struct KubeImpl {
    pub client: Client,
}

impl KubeImpl {
    pub async fn try_default() -> Result<Self, kube::Error> {
        Ok(KubeImpl {
            client: Client::try_default().await?,
        })
    }

    pub fn new(client: Client) -> Self {
        KubeImpl { client }
    }
}
