//! Userdata assembly (§4.6): internal cloud-init/ignition rendering, or
//! fetching an externally produced cloud-config secret.

use std::sync::Arc;

use chrono::Utc;
use kube::ResourceExt;

use machine_shared::config::ControllerConfig;
use machine_shared::k8s::secret::{self, KEY_CLOUD_CONFIG, SYSTEM_NAMESPACE};
use machine_shared::machine::{Machine, ANNOTATION_MACHINE_DEPLOYMENT_REVISION};

use super::bootstrap_token::{ensure_token, render_kubeconfig};
use super::owner_chain::machine_deployment_owner;
use crate::util::controller_ctx::ControllerContext;
use crate::util::ControllerError;

const MACHINE_NAME_PLACEHOLDER: &str = "<MACHINE_NAME>";
const MACHINE_NAME_PLACEHOLDER_URL_ENCODED: &str = "%3CMACHINE_NAME%3E";

#[derive(Debug, thiserror::Error)]
pub enum UserdataError {
    #[error("external bootstrap secret not ready yet")]
    SecretNotReady,
    #[error("external bootstrap secret is at revision {secret_revision}, MachineDeployment is at {expected}: not ready yet")]
    RevisionMismatch { secret_revision: String, expected: String },
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error(transparent)]
    BootstrapToken(#[from] super::bootstrap_token::BootstrapTokenError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Renders the cloud-init/ignition fragment for a Machine's OS from its
/// kubelet version, cluster DNS IPs, proxy settings and bootstrap
/// kubeconfig. One assembler for both cloud-init and ignition families: the
/// request is a flat key-value document both can consume, matching how the
/// source templates a single userdata string regardless of target OS.
fn render_cloud_init(machine: &Machine, config: &ControllerConfig, kubeconfig: &str, cloud_config: &str) -> String {
    let dns_ips = config.cluster_dns_ips.join(",");
    let mut out = String::new();
    out.push_str("#cloud-config\n");
    out.push_str(&format!("# machine: {}\n", machine.spec.name));
    out.push_str(&format!("# kubelet-version: {}\n", machine.spec.versions.kubelet));
    if !dns_ips.is_empty() {
        out.push_str(&format!("# cluster-dns: {dns_ips}\n"));
    }
    if let Some(proxy) = &config.http_proxy {
        out.push_str(&format!("# http-proxy: {proxy}\n"));
    }
    if let Some(proxy) = &config.https_proxy {
        out.push_str(&format!("# https-proxy: {proxy}\n"));
    }
    if let Some(no_proxy) = &config.no_proxy {
        out.push_str(&format!("# no-proxy: {no_proxy}\n"));
    }
    if !cloud_config.is_empty() {
        out.push_str(cloud_config);
        out.push('\n');
    }
    out.push_str("bootstrap-kubeconfig: |\n");
    for line in kubeconfig.lines() {
        out.push_str("  ");
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Internal mode: mint a bootstrap token and render userdata in-process.
async fn assemble_internal(
    machine: &Machine,
    cluster_info_kubeconfig: &str,
    cloud_config: &str,
    ctx: &Arc<ControllerContext>,
) -> Result<String, UserdataError> {
    let token = ensure_token(
        SYSTEM_NAMESPACE,
        &machine.spec.name,
        Utc::now(),
        ctx.kube_client.clone(),
    )
    .await?;
    let kubeconfig = render_kubeconfig(cluster_info_kubeconfig, &token);
    Ok(render_cloud_init(machine, &ctx.config, &kubeconfig, cloud_config))
}

fn substitute_machine_name(payload: &str, machine_name: &str) -> String {
    payload
        .replace(MACHINE_NAME_PLACEHOLDER, machine_name)
        .replace(MACHINE_NAME_PLACEHOLDER_URL_ENCODED, machine_name)
}

/// External mode: locate the owning MachineDeployment's cloud-config
/// secret, enforcing the revision gate before consuming it.
async fn assemble_external(machine: &Machine, ctx: &Arc<ControllerContext>) -> Result<String, UserdataError> {
    let Some(deployment) = machine_deployment_owner(machine, ctx).await? else {
        return Err(UserdataError::SecretNotReady);
    };

    let secret_name = format!(
        "{}-{}-bootstrap-config",
        deployment.name_any(),
        machine.namespace().unwrap_or_default()
    );

    let Some(secret) = secret::get(&secret_name, SYSTEM_NAMESPACE, ctx.kube_client.clone()).await? else {
        return Err(UserdataError::SecretNotReady);
    };

    let secret_revision = secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_MACHINE_DEPLOYMENT_REVISION))
        .cloned()
        .unwrap_or_default();
    if secret_revision != deployment.spec.revision {
        return Err(UserdataError::RevisionMismatch {
            secret_revision,
            expected: deployment.spec.revision.clone(),
        });
    }

    let payload = secret
        .data
        .as_ref()
        .and_then(|d| d.get(KEY_CLOUD_CONFIG))
        .map(|b| String::from_utf8_lossy(&b.0).to_string())
        .or_else(|| secret.string_data.as_ref().and_then(|m| m.get(KEY_CLOUD_CONFIG)).cloned())
        .unwrap_or_default();

    Ok(substitute_machine_name(&payload, &machine.spec.name))
}

/// Assembles userdata for `machine` per the process-wide external-bootstrap
/// flag. `cluster_info_kubeconfig`/`cloud_config` are only used in internal
/// mode.
pub async fn assemble(
    machine: &Machine,
    cluster_info_kubeconfig: &str,
    cloud_config: &str,
    ctx: &Arc<ControllerContext>,
) -> Result<String, UserdataError> {
    if ctx.config.external_bootstrap {
        assemble_external(machine, ctx).await
    } else {
        assemble_internal(machine, cluster_info_kubeconfig, cloud_config, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_plain_and_url_encoded_placeholder() {
        let payload = "hostname: <MACHINE_NAME>\nquery: name=%3CMACHINE_NAME%3E";
        let out = substitute_machine_name(payload, "worker-1");
        assert_eq!(out, "hostname: worker-1\nquery: name=worker-1");
    }

    #[test]
    fn renders_cloud_init_with_kubeconfig_indented() {
        let mut machine = Machine::new("m1", machine_shared::machine::MachineSpec::default());
        machine.spec.versions.kubelet = "1.28.0".to_string();
        let config = ControllerConfig {
            workers: 1,
            shard_name: String::new(),
            join_cluster_timeout: None,
            skip_eviction_after: std::time::Duration::from_secs(60),
            external_bootstrap: false,
            cluster_dns_ips: vec!["10.0.0.10".to_string()],
            http_proxy: None,
            https_proxy: None,
            no_proxy: None,
            bootstrap_apiserver_override: None,
        };
        let out = render_cloud_init(&machine, &config, "apiVersion: v1\n", "");
        assert!(out.contains("kubelet-version: 1.28.0"));
        assert!(out.contains("cluster-dns: 10.0.0.10"));
        assert!(out.contains("  apiVersion: v1"));
    }
}
