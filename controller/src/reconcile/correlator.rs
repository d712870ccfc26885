//! Matches a provider instance to a cluster Node (§4.2).
//!
//! Runs after ensure-instance confirms the cloud/bare-metal side exists;
//! its job is purely to answer "which Node (if any) is this instance",
//! never to mutate anything.

use k8s_openapi::api::core::v1::Node;

use machine_provider::{Instance, InstanceAddress};

/// Outcome of a correlation attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Correlation {
    /// A Node was matched.
    Matched(String),
    /// No addresses are known yet; caller should requeue after 15s rather
    /// than treat this as "no match forever".
    NoAddressesYet,
    /// Addresses are known, but no Node matched.
    NoMatch,
}

/// The AWS provider ID shorthand `aws:///<instance-id>` also matches the
/// zoned form `aws:///<zone>/<instance-id>` a Node may carry.
fn aws_shorthand_matches(instance_provider_id: &str, node_provider_id: &str) -> bool {
    let Some(instance_id) = instance_provider_id.strip_prefix("aws:///") else {
        return false;
    };
    let Some(node_suffix) = node_provider_id.strip_prefix("aws:///") else {
        return false;
    };
    // zoned form is "<zone>/<instance-id>"; bare form is just the id.
    node_suffix == instance_id || node_suffix.rsplit('/').next() == Some(instance_id)
}

fn provider_ids_match(instance_provider_id: &str, node_provider_id: &str) -> bool {
    if instance_provider_id.eq_ignore_ascii_case(node_provider_id) {
        return true;
    }
    aws_shorthand_matches(instance_provider_id, node_provider_id)
}

fn node_addresses(node: &Node) -> Vec<String> {
    node.status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .map(|addrs| addrs.iter().map(|a| a.address.clone()).collect())
        .unwrap_or_default()
}

fn addresses_overlap(node: &Node, instance_addresses: &[InstanceAddress]) -> bool {
    let node_addrs = node_addresses(node);
    instance_addresses
        .iter()
        .any(|ia| node_addrs.iter().any(|na| na == &ia.address))
}

/// Matches `instance` against `nodes`, per §4.2's provider-ID-then-address
/// rules. `provider_name` is the backing `Provider::name()`; only
/// `"hetzner"` gets the extra name tie-breaker.
pub fn correlate(instance: &dyn Instance, provider_name: &str, nodes: &[Node]) -> Correlation {
    let provider_id = instance.provider_id();
    if !provider_id.is_empty() {
        if let Some(node) = nodes.iter().find(|n| {
            n.spec
                .as_ref()
                .and_then(|s| s.provider_id.as_deref())
                .map(|npid| provider_ids_match(&provider_id, npid))
                .unwrap_or(false)
        }) {
            return Correlation::Matched(node.metadata.name.clone().unwrap_or_default());
        }
    }

    let addresses = instance.addresses();
    if addresses.is_empty() {
        return Correlation::NoAddressesYet;
    }

    let hetzner = provider_name.eq_ignore_ascii_case("hetzner");
    for node in nodes {
        if !addresses_overlap(node, &addresses) {
            continue;
        }
        if hetzner && node.metadata.name.as_deref() != Some(instance.name().as_str()) {
            continue;
        }
        return Correlation::Matched(node.metadata.name.clone().unwrap_or_default());
    }

    Correlation::NoMatch
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeAddress, NodeSpec, NodeStatus};
    use kube::api::ObjectMeta;

    struct FakeInstance {
        id: String,
        name: String,
        provider_id: String,
        addresses: Vec<InstanceAddress>,
    }

    impl Instance for FakeInstance {
        fn id(&self) -> String {
            self.id.clone()
        }
        fn name(&self) -> String {
            self.name.clone()
        }
        fn provider_id(&self) -> String {
            self.provider_id.clone()
        }
        fn addresses(&self) -> Vec<InstanceAddress> {
            self.addresses.clone()
        }
        fn status(&self) -> machine_provider::InstanceStatus {
            machine_provider::InstanceStatus::Running
        }
    }

    fn node_with(name: &str, provider_id: Option<&str>, addresses: &[&str]) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                provider_id: provider_id.map(str::to_string),
                ..Default::default()
            }),
            status: Some(NodeStatus {
                addresses: Some(
                    addresses
                        .iter()
                        .map(|a| NodeAddress {
                            type_: "InternalIP".to_string(),
                            address: a.to_string(),
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn matches_on_provider_id_case_insensitively() {
        let instance = FakeInstance {
            id: "i-1".into(),
            name: "i-1".into(),
            provider_id: "aws:///us-east-1a/i-ABCDEF".into(),
            addresses: vec![],
        };
        let nodes = vec![node_with("node1", Some("AWS:///us-east-1a/i-abcdef"), &[])];
        assert_eq!(
            correlate(&instance, "aws", &nodes),
            Correlation::Matched("node1".to_string())
        );
    }

    #[test]
    fn matches_aws_shorthand_against_zoned_node_id() {
        let instance = FakeInstance {
            id: "i-1".into(),
            name: "i-1".into(),
            provider_id: "aws:///i-abcdef".into(),
            addresses: vec![],
        };
        let nodes = vec![node_with("node1", Some("aws:///us-east-1a/i-abcdef"), &[])];
        assert_eq!(
            correlate(&instance, "aws", &nodes),
            Correlation::Matched("node1".to_string())
        );
    }

    #[test]
    fn no_addresses_requeues_instead_of_failing_to_match() {
        let instance = FakeInstance {
            id: "i-1".into(),
            name: "i-1".into(),
            provider_id: String::new(),
            addresses: vec![],
        };
        let nodes = vec![node_with("node1", None, &["10.0.0.1"])];
        assert_eq!(correlate(&instance, "generic", &nodes), Correlation::NoAddressesYet);
    }

    #[test]
    fn hetzner_requires_name_match_despite_address_overlap() {
        let instance = FakeInstance {
            id: "i-1".into(),
            name: "instance3".into(),
            provider_id: String::new(),
            addresses: vec![InstanceAddress {
                address_type: "InternalIP".into(),
                address: "192.168.1.3".into(),
            }],
        };
        let nodes = vec![node_with("node3", None, &["192.168.1.3"])];
        assert_eq!(correlate(&instance, "hetzner", &nodes), Correlation::NoMatch);

        let instance_matching_name = FakeInstance {
            name: "node3".into(),
            ..instance
        };
        assert_eq!(
            correlate(&instance_matching_name, "hetzner", &nodes),
            Correlation::Matched("node3".to_string())
        );
    }
}
