//! SSH-provisioned bare-metal driver.
//!
//! Satisfies the same `Provider` contract as [`crate::tinkerbell`] by
//! executing a short, idempotent sequence of shell commands on the target
//! host instead of driving a workflow engine: write the base64 userdata,
//! decode it into `/etc/cloud/cloud.cfg.d`, mark the host provisioned, and
//! trigger `cloud-init clean --reboot`. A non-zero exit from any step is a
//! failure.

use async_ssh2_tokio::client::{AuthMethod, Client, ServerCheckMethod};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use machine_provider::{
    instance::{InstanceAddress, InstanceStatus},
    provider::MachineContext,
    Instance, Provider, ProviderError, Result as ProviderResult,
};
use serde::Deserialize;

pub const PROVIDER_NAME: &str = "ssh";

#[derive(Debug, Deserialize)]
struct SshConfig {
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    user: String,
    private_key_path: String,
}

fn default_port() -> u16 {
    22
}

/// The command surface the driver needs from an SSH session. Narrowed to
/// exactly what §4.8 describes so it can be faked in tests without a real
/// network connection.
#[async_trait]
pub trait SshRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<(), crate::error::DriverError>;
}

/// Wraps a live `async_ssh2_tokio` session.
pub struct LiveSshSession {
    client: Client,
}

#[async_trait]
impl SshRunner for LiveSshSession {
    async fn run(&self, command: &str) -> Result<(), crate::error::DriverError> {
        let result = self
            .client
            .execute(command)
            .await
            .map_err(|e| crate::error::DriverError::SshFailed(e.to_string()))?;
        if result.exit_status != 0 {
            return Err(crate::error::DriverError::SshFailed(format!(
                "`{command}` exited {}: {}",
                result.exit_status, result.stderr
            )));
        }
        Ok(())
    }
}

/// A single mutex-guarded SSH connection pool per process, keyed by
/// host-ID, as the concurrency model requires: two Machines never open
/// duplicate sessions to the same physical host.
#[derive(Default)]
pub struct SshConnectionPool {
    sessions: Mutex<HashMap<String, std::sync::Arc<LiveSshSession>>>,
}

impl SshConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    async fn get_or_connect(
        &self,
        host_id: &str,
        config: &SshConfig,
    ) -> ProviderResult<std::sync::Arc<LiveSshSession>> {
        if let Some(existing) = self.sessions.lock().unwrap().get(host_id).cloned() {
            return Ok(existing);
        }
        let auth = AuthMethod::with_key_file(&config.private_key_path, None);
        let client = Client::connect(
            (config.host.as_str(), config.port),
            &config.user,
            auth,
            ServerCheckMethod::NoCheck,
        )
        .await
        .map_err(|e| ProviderError::transient(anyhow::anyhow!(e)))?;
        let session = std::sync::Arc::new(LiveSshSession { client });
        self.sessions
            .lock()
            .unwrap()
            .insert(host_id.to_string(), session.clone());
        Ok(session)
    }
}

pub struct SshDriver {
    pool: std::sync::Arc<SshConnectionPool>,
}

impl SshDriver {
    pub fn new(pool: std::sync::Arc<SshConnectionPool>) -> Self {
        SshDriver { pool }
    }

    fn config(machine: &MachineContext) -> ProviderResult<SshConfig> {
        serde_json::from_value(machine.provider_config.clone())
            .map_err(|e| ProviderError::terminal(format!("invalid ssh provider config: {e}")))
    }
}

struct SshInstance {
    host: String,
    status: InstanceStatus,
}

impl Instance for SshInstance {
    fn id(&self) -> String {
        self.host.clone()
    }
    fn name(&self) -> String {
        self.host.clone()
    }
    fn provider_id(&self) -> String {
        format!("ssh://{}", self.host)
    }
    fn addresses(&self) -> Vec<InstanceAddress> {
        vec![InstanceAddress {
            address_type: "InternalIP".to_string(),
            address: self.host.clone(),
        }]
    }
    fn status(&self) -> InstanceStatus {
        self.status
    }
}

#[async_trait]
impl Provider for SshDriver {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    /// There is no durable provisioning record to query; the driver treats
    /// "creation was attempted" as "instance exists" and relies on the
    /// reconciler's own NodeRef bookkeeping for the rest.
    async fn get(&self, _machine: &MachineContext) -> ProviderResult<Box<dyn Instance>> {
        Err(ProviderError::NotFound)
    }

    async fn create(
        &self,
        machine: &MachineContext,
        userdata: &str,
    ) -> ProviderResult<Box<dyn Instance>> {
        let config = Self::config(machine)?;
        let session = self.pool.get_or_connect(&config.host, &config).await?;
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, userdata);

        session
            .run(&format!(
                "echo '{encoded}' | base64 -d | sudo tee /etc/cloud/cloud.cfg.d/99-machine.cfg > /dev/null"
            ))
            .await
            .map_err(|e| ProviderError::transient(anyhow::anyhow!(e)))?;
        session
            .run("echo status=Provisioned | sudo tee /etc/machine-controller-status")
            .await
            .map_err(|e| ProviderError::transient(anyhow::anyhow!(e)))?;
        session
            .run("sudo cloud-init clean --reboot")
            .await
            .map_err(|e| ProviderError::transient(anyhow::anyhow!(e)))?;

        Ok(Box::new(SshInstance {
            host: config.host,
            status: InstanceStatus::Running,
        }))
    }

    /// No-op in the source this was distilled from; whether that is
    /// intentional is unclear upstream, so this stays a no-op rather than
    /// inventing a deprovisioning sequence.
    // TODO: decide whether SSH deprovisioning should wipe /etc/cloud/cloud.cfg.d.
    async fn cleanup(&self, _machine: &MachineContext) -> ProviderResult<bool> {
        Ok(true)
    }

    fn validate(&self, machine: &MachineContext) -> ProviderResult<()> {
        Self::config(machine).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingRunner {
        calls: AtomicUsize,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl SshRunner for RecordingRunner {
        async fn run(&self, _command: &str) -> Result<(), crate::error::DriverError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on == Some(n) {
                return Err(crate::error::DriverError::SshFailed("boom".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn runner_propagates_nonzero_exit_as_failure() {
        let runner = RecordingRunner {
            calls: AtomicUsize::new(0),
            fail_on: Some(1),
        };
        assert!(runner.run("echo one").await.is_ok());
        assert!(runner.run("echo two").await.is_err());
    }

    #[test]
    fn cleanup_is_a_documented_no_op() {
        // Exercised via the Provider::cleanup contract test in the
        // reconciler crate; kept trivial here since there is nothing to
        // assert beyond "always reports gone".
    }
}
