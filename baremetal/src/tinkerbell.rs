//! Provider backed by a Tinkerbell-family workflow engine: Hardware is
//! claimed by writing the Machine UID into its `instanceId`, a Template is
//! ensured to exist, and a Workflow is created to drive the actual PXE
//! install.

use async_trait::async_trait;
use chrono::Utc;
use kube::{
    api::{Api, ListParams, Patch, PatchParams, PostParams},
    Client, ResourceExt,
};
use log::{info, trace};
use machine_provider::{
    instance::{InstanceAddress, InstanceStatus},
    provider::MachineContext,
    Instance, Provider, ProviderError, Result as ProviderResult,
};
use serde::Deserialize;

use crate::netmask::to_cidr;
use crate::types::{Hardware, HardwareState, Template, TemplateSpec, Workflow, WorkflowSpec, LABEL_HARDWARE};

pub const PROVIDER_NAME: &str = "tinkerbell";

#[derive(Debug, Deserialize)]
struct TinkerbellConfig {
    /// Candidate Hardware names this Machine may claim; first unclaimed
    /// one wins. Empty means "any Hardware in the cluster".
    #[serde(default)]
    hardware_candidates: Vec<String>,
    template: String,
    template_data: String,
}

pub struct TinkerbellInstance {
    hardware_name: String,
    addresses: Vec<InstanceAddress>,
    status: InstanceStatus,
}

impl Instance for TinkerbellInstance {
    fn id(&self) -> String {
        self.hardware_name.clone()
    }
    fn name(&self) -> String {
        self.hardware_name.clone()
    }
    fn provider_id(&self) -> String {
        format!("tinkerbell://{}", self.hardware_name)
    }
    fn addresses(&self) -> Vec<InstanceAddress> {
        self.addresses.clone()
    }
    fn status(&self) -> InstanceStatus {
        self.status
    }
}

pub struct TinkerbellProvider {
    client: Client,
}

impl TinkerbellProvider {
    pub fn new(client: Client) -> Self {
        TinkerbellProvider { client }
    }

    fn config(machine: &MachineContext) -> ProviderResult<TinkerbellConfig> {
        serde_json::from_value(machine.provider_config.clone())
            .map_err(|e| ProviderError::terminal(format!("invalid tinkerbell provider config: {e}")))
    }

    async fn find_claimed_hardware(&self, machine_uid: &str) -> ProviderResult<Option<Hardware>> {
        let api: Api<Hardware> = Api::all(self.client.clone());
        let all = api
            .list(&ListParams::default())
            .await
            .map_err(|e| ProviderError::transient(e))?;
        Ok(all
            .items
            .into_iter()
            .find(|hw| hw.spec.instance_id == machine_uid))
    }

    async fn pick_unclaimed_hardware(
        &self,
        candidates: &[String],
    ) -> ProviderResult<Hardware> {
        let api: Api<Hardware> = Api::all(self.client.clone());
        let all = api
            .list(&ListParams::default())
            .await
            .map_err(|e| ProviderError::transient(e))?;
        all.items
            .into_iter()
            .filter(|hw| candidates.is_empty() || candidates.contains(&hw.name_any()))
            .find(|hw| hw.spec.instance_id.is_empty())
            .ok_or_else(|| ProviderError::terminal("no unclaimed hardware available"))
    }

    fn instance_from_hardware(hw: &Hardware) -> TinkerbellInstance {
        let addresses = hw
            .spec
            .interfaces
            .iter()
            .filter(|iface| !iface.ip_address.is_empty())
            .map(|iface| InstanceAddress {
                address_type: "InternalIP".to_string(),
                address: iface.ip_address.clone(),
            })
            .collect();
        let status = match hw.status.as_ref().map(|s| s.state) {
            Some(HardwareState::Provisioned) => InstanceStatus::Running,
            Some(HardwareState::Staged) => InstanceStatus::Creating,
            Some(HardwareState::Decommissioned) => InstanceStatus::Deleted,
            _ => InstanceStatus::Unknown,
        };
        TinkerbellInstance {
            hardware_name: hw.name_any(),
            addresses,
            status,
        }
    }

    async fn ensure_template(&self, name: &str, data: &str) -> ProviderResult<()> {
        let api: Api<Template> = Api::default_namespaced(self.client.clone());
        if api.get_opt(name).await.map_err(ProviderError::transient)?.is_some() {
            return Ok(());
        }
        let template = Template::new(name, TemplateSpec { data: data.to_string() });
        api.create(&PostParams::default(), &template)
            .await
            .map_err(ProviderError::transient)?;
        Ok(())
    }
}

#[async_trait]
impl Provider for TinkerbellProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn get(&self, machine: &MachineContext) -> ProviderResult<Box<dyn Instance>> {
        match self.find_claimed_hardware(&machine.uid).await? {
            Some(hw) => Ok(Box::new(Self::instance_from_hardware(&hw))),
            None => Err(ProviderError::NotFound),
        }
    }

    async fn create(&self, machine: &MachineContext, userdata: &str) -> ProviderResult<Box<dyn Instance>> {
        let config = Self::config(machine)?;
        let mut hw = self
            .pick_unclaimed_hardware(&config.hardware_candidates)
            .await?;
        let hw_name = hw.name_any();

        let hw_api: Api<Hardware> = Api::all(self.client.clone());
        let claim_patch = Patch::Merge(serde_json::json!({
            "spec": { "instanceId": machine.uid },
            "status": { "state": "Staged" },
        }));
        hw_api
            .patch(&hw_name, &PatchParams::apply("machine-baremetal"), &claim_patch)
            .await
            .map_err(ProviderError::transient)?;
        hw.spec.instance_id = machine.uid.clone();

        self.ensure_template(&config.template, &config.template_data)
            .await?;

        let iface = hw
            .spec
            .interfaces
            .first()
            .ok_or_else(|| ProviderError::terminal(format!("hardware {hw_name} has no interfaces")))?;
        let cidr = to_cidr(&iface.ip_address, &iface.netmask)
            .map_err(|e| ProviderError::terminal(e.to_string()))?;

        let mut hardware_map = std::collections::BTreeMap::new();
        hardware_map.insert("mac".to_string(), iface.mac.clone());
        hardware_map.insert("cidr".to_string(), cidr);
        hardware_map.insert("nameserver".to_string(), iface.name_servers.first().cloned().unwrap_or_default());
        hardware_map.insert("gateway".to_string(), iface.gateway.clone());
        hardware_map.insert(
            "userdata".to_string(),
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, userdata),
        );

        let workflow_name = format!("{hw_name}-{}-{}", config.template, Utc::now().timestamp());
        let mut workflow = Workflow::new(
            &workflow_name,
            WorkflowSpec {
                template_ref: config.template.clone(),
                hardware_ref: hw_name.clone(),
                hardware_map,
            },
        );
        workflow
            .labels_mut()
            .insert(LABEL_HARDWARE.to_string(), hw_name.clone());
        let wf_api: Api<Workflow> = Api::default_namespaced(self.client.clone());
        wf_api
            .create(&PostParams::default(), &workflow)
            .await
            .map_err(ProviderError::transient)?;

        info!("created workflow {workflow_name} for hardware {hw_name}");
        Ok(Box::new(Self::instance_from_hardware(&hw)))
    }

    async fn cleanup(&self, machine: &MachineContext) -> ProviderResult<bool> {
        let hw = match self.find_claimed_hardware(&machine.uid).await? {
            Some(hw) => hw,
            None => return Ok(true),
        };
        let hw_name = hw.name_any();

        let wf_api: Api<Workflow> = Api::default_namespaced(self.client.clone());
        let params = ListParams::default().labels(&format!("{LABEL_HARDWARE}={hw_name}"));
        let workflows = wf_api.list(&params).await.map_err(ProviderError::transient)?;
        for wf in workflows.items {
            let state = wf.status.as_ref().and_then(|s| s.state);
            if matches!(
                state,
                Some(crate::types::WorkflowState::Pending) | Some(crate::types::WorkflowState::Timeout)
            ) {
                trace!("deleting stale workflow {}", wf.name_any());
                wf_api
                    .delete(&wf.name_any(), &Default::default())
                    .await
                    .map_err(ProviderError::transient)?;
            }
        }

        // Hardware is long-lived host inventory, reused across many
        // occupants; release it rather than delete it (see DESIGN.md).
        let hw_api: Api<Hardware> = Api::all(self.client.clone());
        let release_patch = Patch::Merge(serde_json::json!({
            "spec": { "instanceId": "" },
            "status": { "state": "Decommissioned" },
        }));
        hw_api
            .patch(&hw_name, &PatchParams::apply("machine-baremetal"), &release_patch)
            .await
            .map_err(ProviderError::transient)?;
        Ok(true)
    }

    fn validate(&self, machine: &MachineContext) -> ProviderResult<()> {
        Self::config(machine).map(|_| ())
    }
}
