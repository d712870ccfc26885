/// Lifecycle state a provider reports for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Creating,
    Running,
    Deleted,
    Unknown,
}

/// A Kubernetes-style address: one of `InternalIP`, `ExternalIP`,
/// `Hostname`, `InternalDNS`, `ExternalDNS`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct InstanceAddress {
    pub address_type: String,
    pub address: String,
}

/// Opaque handle a `Provider` returns for a cloud instance. Implementations
/// wrap whatever SDK response or internal record they need; the reconciler
/// and correlator only ever see this narrow capability set.
pub trait Instance: Send + Sync {
    /// Provider-local identifier for this instance (not the machine UID).
    fn id(&self) -> String;
    /// Human-readable name, used as a correlator tie-breaker by providers
    /// (e.g. Hetzner) whose address space can't otherwise disambiguate.
    fn name(&self) -> String;
    /// `Node.Spec.ProviderID`-shaped identifier, empty if the provider
    /// doesn't assign one (the reconciler then synthesizes one).
    fn provider_id(&self) -> String;
    /// Every address this instance is reachable at, in provider-reported
    /// order (the caller is responsible for sorting before persisting).
    fn addresses(&self) -> Vec<InstanceAddress>;
    fn status(&self) -> InstanceStatus;
}

/// Sorts addresses deterministically (by type, then value) so address
/// projection never flaps between reconciles with unchanged input.
pub fn sorted_addresses(mut addresses: Vec<InstanceAddress>) -> Vec<InstanceAddress> {
    addresses.sort();
    addresses
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_by_type_then_value() {
        let addrs = vec![
            InstanceAddress { address_type: "ExternalIP".into(), address: "2.2.2.2".into() },
            InstanceAddress { address_type: "InternalIP".into(), address: "10.0.0.2".into() },
            InstanceAddress { address_type: "InternalIP".into(), address: "10.0.0.1".into() },
        ];
        let sorted = sorted_addresses(addrs);
        assert_eq!(sorted[0].address_type, "ExternalIP");
        assert_eq!(sorted[1].address, "10.0.0.1");
        assert_eq!(sorted[2].address, "10.0.0.2");
    }
}
