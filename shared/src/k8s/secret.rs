use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{Api, ListParams, ObjectList, PostParams},
    client::Client,
};
use log::trace;

pub const LABEL_MACHINE_NAME: &str = "machine.k8s.io/machine.name";
pub const BOOTSTRAP_TOKEN_SECRET_TYPE: &str = "bootstrap.kubernetes.io/token";
/// Namespace bootstrap-token secrets and external-bootstrap cloud-config
/// secrets live in, regardless of the Machine's own namespace.
pub const SYSTEM_NAMESPACE: &str = "kube-system";
/// Data key carrying the external-bootstrap cloud-config payload.
pub const KEY_CLOUD_CONFIG: &str = "cloud-config";

/// Finds bootstrap-token secrets labeled for a given Machine name in a
/// namespace. More than one result is the caller's signal of ambiguity.
pub async fn find_by_machine_label(
    namespace: &str,
    machine_name: &str,
    kube_client: Client,
) -> Result<ObjectList<Secret>, anyhow::Error> {
    trace!("find_by_machine_label machine_name={}", machine_name);
    let secrets: Api<Secret> = Api::namespaced(kube_client, namespace);
    let params = ListParams::default().labels(&format!("{}={}", LABEL_MACHINE_NAME, machine_name));
    Ok(secrets.list(&params).await?)
}

pub async fn create(
    secret: &Secret,
    namespace: &str,
    kube_client: Client,
) -> Result<Secret, anyhow::Error> {
    let secrets: Api<Secret> = Api::namespaced(kube_client, namespace);
    Ok(secrets.create(&PostParams::default(), secret).await?)
}

pub async fn replace(
    name: &str,
    secret: &Secret,
    namespace: &str,
    kube_client: Client,
) -> Result<Secret, anyhow::Error> {
    let secrets: Api<Secret> = Api::namespaced(kube_client, namespace);
    Ok(secrets
        .replace(name, &PostParams::default(), secret)
        .await?)
}

pub async fn get(
    name: &str,
    namespace: &str,
    kube_client: Client,
) -> Result<Option<Secret>, anyhow::Error> {
    let secrets: Api<Secret> = Api::namespaced(kube_client, namespace);
    Ok(secrets.get_opt(name).await?)
}
