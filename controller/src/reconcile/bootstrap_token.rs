//! Per-Machine bootstrap-token lifecycle (§4.7).
//!
//! One secret per Machine, found by the `machine.k8s.io/machine.name`
//! label; issued on first use, renewed in place inside the last 30
//! minutes of life, reused otherwise. Garbage collection of expired
//! secrets is an external concern.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use rand::Rng;

use machine_shared::k8s::secret::{self, BOOTSTRAP_TOKEN_SECRET_TYPE, LABEL_MACHINE_NAME};

const TOKEN_ID_CHARS: &str = "abcdefghijklmnopqrstuvwxyz0123456789";
const TOKEN_SECRET_CHARS: &str = "abcdefghijklmnopqrstuvwxyz0123456789";
const TOKEN_ID_LEN: usize = 6;
const TOKEN_SECRET_LEN: usize = 16;
const TOKEN_TTL_MINUTES: i64 = 60;
const RENEW_WITHIN_MINUTES: i64 = 30;

const KEY_TOKEN_ID: &str = "token-id";
const KEY_TOKEN_SECRET: &str = "token-secret";
const KEY_EXPIRATION: &str = "expiration";
const KEY_DESCRIPTION: &str = "description";
const KEY_USAGE_AUTH: &str = "usage-bootstrap-authentication";
const KEY_USAGE_SIGNING: &str = "usage-bootstrap-signing";
const KEY_EXTRA_GROUPS: &str = "auth-extra-groups";
const EXTRA_GROUPS_VALUE: &str = "system:bootstrappers:machine-controller:default-node-token";

#[derive(Debug, thiserror::Error)]
pub enum BootstrapTokenError {
    #[error("kube error: {0}")]
    Kube(#[from] anyhow::Error),
    #[error("more than one bootstrap-token secret found for machine {0}")]
    Ambiguous(String),
    #[error("secret {0} is missing required data key {1}")]
    MalformedSecret(String, &'static str),
}

fn random_string(charset: &str, len: usize) -> String {
    let chars: Vec<char> = charset.chars().collect();
    let mut rng = rand::thread_rng();
    (0..len).map(|_| chars[rng.gen_range(0..chars.len())]).collect()
}

fn data_map(token_id: &str, token_secret: &str, expiration: DateTime<Utc>, machine_name: &str) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();
    data.insert(KEY_TOKEN_ID.to_string(), token_id.to_string());
    data.insert(KEY_TOKEN_SECRET.to_string(), token_secret.to_string());
    data.insert(KEY_EXPIRATION.to_string(), expiration.to_rfc3339());
    data.insert(
        KEY_DESCRIPTION.to_string(),
        format!("bootstrap token for machine {machine_name}"),
    );
    data.insert(KEY_USAGE_AUTH.to_string(), "true".to_string());
    data.insert(KEY_USAGE_SIGNING.to_string(), "true".to_string());
    data.insert(KEY_EXTRA_GROUPS.to_string(), EXTRA_GROUPS_VALUE.to_string());
    data
}

fn secret_name(token_id: &str) -> String {
    format!("bootstrap-token-{token_id}")
}

fn build_secret(machine_name: &str, token_id: &str, token_secret: &str, expiration: DateTime<Utc>) -> Secret {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_MACHINE_NAME.to_string(), machine_name.to_string());
    let string_data = data_map(token_id, token_secret, expiration, machine_name);
    Secret {
        metadata: ObjectMeta {
            name: Some(secret_name(token_id)),
            labels: Some(labels),
            ..Default::default()
        },
        type_: Some(BOOTSTRAP_TOKEN_SECRET_TYPE.to_string()),
        string_data: Some(string_data),
        ..Default::default()
    }
}

/// Reads a data key from a Secret, whether it arrived as already-persisted
/// `data` (base64-decoded by k8s-openapi's `ByteString`) or as `stringData`
/// on a not-yet-persisted object (e.g. a freshly built secret in tests).
fn read_field(secret: &Secret, key: &'static str) -> Result<String, BootstrapTokenError> {
    if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return Ok(String::from_utf8_lossy(&bytes.0).to_string());
    }
    secret
        .string_data
        .as_ref()
        .and_then(|m| m.get(key))
        .cloned()
        .ok_or_else(|| BootstrapTokenError::MalformedSecret(secret.name_any(), key))
}

fn token_from_data(secret: &Secret) -> Result<String, BootstrapTokenError> {
    Ok(format!(
        "{}.{}",
        read_field(secret, KEY_TOKEN_ID)?,
        read_field(secret, KEY_TOKEN_SECRET)?
    ))
}

fn expiration_of(secret: &Secret) -> Result<DateTime<Utc>, BootstrapTokenError> {
    let raw = read_field(secret, KEY_EXPIRATION)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| BootstrapTokenError::Kube(anyhow::anyhow!(e)))
}

/// Ensures a `<id>.<secret>` bootstrap token exists for a Machine,
/// creating, renewing, or reusing its backing secret as needed. Returns
/// the token string.
pub async fn ensure_token(
    namespace: &str,
    machine_name: &str,
    now: DateTime<Utc>,
    kube_client: kube::Client,
) -> Result<String, BootstrapTokenError> {
    let existing = secret::find_by_machine_label(namespace, machine_name, kube_client.clone())
        .await
        .map_err(BootstrapTokenError::Kube)?;

    match existing.items.len() {
        0 => {
            let token_id = random_string(TOKEN_ID_CHARS, TOKEN_ID_LEN);
            let token_secret = random_string(TOKEN_SECRET_CHARS, TOKEN_SECRET_LEN);
            let expiration = now + ChronoDuration::minutes(TOKEN_TTL_MINUTES);
            let secret = build_secret(machine_name, &token_id, &token_secret, expiration);
            secret::create(&secret, namespace, kube_client)
                .await
                .map_err(BootstrapTokenError::Kube)?;
            Ok(format!("{token_id}.{token_secret}"))
        }
        1 => {
            let existing = &existing.items[0];
            let expiration = expiration_of(existing)?;
            if expiration - now < ChronoDuration::minutes(RENEW_WITHIN_MINUTES) {
                // Renew in place: bump the expiration only. The token-id and
                // token-secret must not change, or a kubeconfig already
                // handed to a booting kubelet stops working.
                let token_id = read_field(existing, KEY_TOKEN_ID)?;
                let token_secret = read_field(existing, KEY_TOKEN_SECRET)?;
                let new_expiration = now + ChronoDuration::minutes(TOKEN_TTL_MINUTES);
                let mut renewed = build_secret(machine_name, &token_id, &token_secret, new_expiration);
                renewed.metadata.name = existing.metadata.name.clone();
                secret::replace(&existing.name_any(), &renewed, namespace, kube_client)
                    .await
                    .map_err(BootstrapTokenError::Kube)?;
                Ok(format!("{token_id}.{token_secret}"))
            } else {
                token_from_data(existing)
            }
        }
        _ => Err(BootstrapTokenError::Ambiguous(machine_name.to_string())),
    }
}

/// Renders a bootstrap kubeconfig: the given cluster-info kubeconfig with
/// its auth-info replaced by a single entry carrying the token.
pub fn render_kubeconfig(cluster_info_kubeconfig: &str, token: &str) -> String {
    // cluster-info kubeconfigs never carry a `users:` section; append one.
    // Templated rather than parsed as YAML so an already-valid
    // cluster-info document round-trips byte-for-byte aside from this
    // addition, matching how the source assembles it as text.
    format!(
        "{}\nusers:\n- name: kubelet-bootstrap\n  user:\n    token: {}\n",
        cluster_info_kubeconfig.trim_end(),
        token
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_kubeconfig_with_token_user() {
        let out = render_kubeconfig("apiVersion: v1\nkind: Config\n", "abc123.def456");
        assert!(out.contains("token: abc123.def456"));
        assert!(out.starts_with("apiVersion: v1"));
    }

    #[test]
    fn build_secret_has_required_data_keys() {
        let secret = build_secret("m1", "abc123", "0123456789abcdef", Utc::now());
        let data = secret.string_data.unwrap();
        for key in [
            KEY_TOKEN_ID,
            KEY_TOKEN_SECRET,
            KEY_EXPIRATION,
            KEY_DESCRIPTION,
            KEY_USAGE_AUTH,
            KEY_USAGE_SIGNING,
            KEY_EXTRA_GROUPS,
        ] {
            assert!(data.contains_key(key), "missing {key}");
        }
        assert_eq!(secret.type_.as_deref(), Some(BOOTSTRAP_TOKEN_SECRET_TYPE));
    }

    #[test]
    fn token_ids_and_secrets_use_expected_lengths() {
        assert_eq!(random_string(TOKEN_ID_CHARS, TOKEN_ID_LEN).len(), TOKEN_ID_LEN);
        assert_eq!(
            random_string(TOKEN_SECRET_CHARS, TOKEN_SECRET_LEN).len(),
            TOKEN_SECRET_LEN
        );
    }
}
