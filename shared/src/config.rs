//! Ambient process configuration.
//!
//! CLI flag parsing is out of scope; what the controller actually needs is
//! a small, env-var driven config object, read through the mockable
//! `EnvVarQuery` trait so config-dependent logic stays testable without
//! touching real process environment.

use crate::os::env_var::EnvVarQuery;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Number of parallel reconcile workers.
    pub workers: usize,
    /// Sharding key; only Machines labeled with this shard are reconciled.
    pub shard_name: String,
    /// How long to wait for a Node to join before giving up on a
    /// MachineSet-owned Machine and deleting it for replacement.
    pub join_cluster_timeout: Option<Duration>,
    /// Machines whose deletion was requested longer than this ago skip
    /// eviction entirely (it's assumed to be futile).
    pub skip_eviction_after: Duration,
    /// When true, userdata comes from an externally produced secret
    /// instead of being assembled in-process.
    pub external_bootstrap: bool,
    /// Comma-separated cluster DNS IPs injected into generated userdata.
    pub cluster_dns_ips: Vec<String>,
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
    /// Override for the API server URL embedded in bootstrap kubeconfigs;
    /// defaults to the in-cluster apiserver when unset.
    pub bootstrap_apiserver_override: Option<String>,
}

const ENV_WORKERS: &str = "MACHINE_CONTROLLER_WORKERS";
const ENV_SHARD_NAME: &str = "MACHINE_CONTROLLER_SHARD";
const ENV_JOIN_TIMEOUT_SECS: &str = "MACHINE_CONTROLLER_JOIN_CLUSTER_TIMEOUT_SECS";
const ENV_SKIP_EVICTION_AFTER_SECS: &str = "MACHINE_CONTROLLER_SKIP_EVICTION_AFTER_SECS";
const ENV_EXTERNAL_BOOTSTRAP: &str = "MACHINE_CONTROLLER_EXTERNAL_BOOTSTRAP";
const ENV_CLUSTER_DNS_IPS: &str = "MACHINE_CONTROLLER_CLUSTER_DNS_IPS";
const ENV_HTTP_PROXY: &str = "HTTP_PROXY";
const ENV_HTTPS_PROXY: &str = "HTTPS_PROXY";
const ENV_NO_PROXY: &str = "NO_PROXY";
const ENV_BOOTSTRAP_APISERVER: &str = "MACHINE_CONTROLLER_BOOTSTRAP_APISERVER";

const DEFAULT_WORKERS: usize = 5;
const DEFAULT_SKIP_EVICTION_AFTER_SECS: u64 = 2 * 60 * 60;

impl ControllerConfig {
    pub fn from_env(query: &dyn EnvVarQuery) -> Self {
        let workers = query
            .get_env_var(ENV_WORKERS)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_WORKERS);
        let shard_name = query.get_env_var(ENV_SHARD_NAME).unwrap_or_default();
        let join_cluster_timeout = query
            .get_env_var(ENV_JOIN_TIMEOUT_SECS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let skip_eviction_after = query
            .get_env_var(ENV_SKIP_EVICTION_AFTER_SECS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(DEFAULT_SKIP_EVICTION_AFTER_SECS));
        let external_bootstrap = query
            .get_env_var(ENV_EXTERNAL_BOOTSTRAP)
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let cluster_dns_ips = query
            .get_env_var(ENV_CLUSTER_DNS_IPS)
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        ControllerConfig {
            workers,
            shard_name,
            join_cluster_timeout,
            skip_eviction_after,
            external_bootstrap,
            cluster_dns_ips,
            http_proxy: query.get_env_var(ENV_HTTP_PROXY).ok(),
            https_proxy: query.get_env_var(ENV_HTTPS_PROXY).ok(),
            no_proxy: query.get_env_var(ENV_NO_PROXY).ok(),
            bootstrap_apiserver_override: query.get_env_var(ENV_BOOTSTRAP_APISERVER).ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::env_var::MockEnvVarQuery;

    #[test]
    fn defaults_when_env_unset() {
        let mut mock = MockEnvVarQuery::new();
        mock.expect_get_env_var().returning(|_| Err(std::env::VarError::NotPresent));
        let cfg = ControllerConfig::from_env(&mock);
        assert_eq!(cfg.workers, DEFAULT_WORKERS);
        assert!(cfg.shard_name.is_empty());
        assert!(cfg.join_cluster_timeout.is_none());
        assert!(!cfg.external_bootstrap);
    }

    #[test]
    fn reads_overrides() {
        let mut mock = MockEnvVarQuery::new();
        mock.expect_get_env_var().returning(|name| match name {
            "MACHINE_CONTROLLER_WORKERS" => Ok("12".to_string()),
            "MACHINE_CONTROLLER_SHARD" => Ok("pool-a".to_string()),
            "MACHINE_CONTROLLER_EXTERNAL_BOOTSTRAP" => Ok("true".to_string()),
            "MACHINE_CONTROLLER_CLUSTER_DNS_IPS" => Ok("10.0.0.10,10.0.0.11".to_string()),
            _ => Err(std::env::VarError::NotPresent),
        });
        let cfg = ControllerConfig::from_env(&mock);
        assert_eq!(cfg.workers, 12);
        assert_eq!(cfg.shard_name, "pool-a");
        assert!(cfg.external_bootstrap);
        assert_eq!(cfg.cluster_dns_ips, vec!["10.0.0.10", "10.0.0.11"]);
    }
}
