//! Cloud providers - everything the engine needs to know about one cloud

pub mod gcp;
pub mod oci;

use reconcile::{
    DescriptorRenderer, DesiredConfig, EngineError, Headroom, ImportBinding, Inventory,
    ProviderQuery, QuotaSpec, ResourceKind, SitePolicy,
};
use std::collections::BTreeMap;
use std::time::Duration;

/// A connected cloud provider
///
/// Extends [`ProviderQuery`] (discovery) with the provider's static
/// knowledge: which kinds to discover, the free-tier quota tables, the
/// retryable failure signatures, defaults and the descriptor renderer.
pub trait CloudProvider: ProviderQuery {
    fn name(&self) -> &'static str;

    /// Resource kinds discovery should walk, in order
    fn kinds(&self) -> &'static [ResourceKind];

    /// The free-tier quota table; shared by ledger, validator and emitter
    fn quotas(&self) -> &'static [QuotaSpec];

    /// Substrings of transient apply failures worth retrying
    fn retryable_signatures(&self) -> &'static [&'static str];

    fn policy(&self) -> SitePolicy;

    /// A sensible starter config
    fn defaults(&self) -> DesiredConfig;

    /// A config that fills the remaining free-tier headroom
    fn maximum_config(&self, headroom: &BTreeMap<&'static str, Headroom>) -> DesiredConfig;

    /// Map adopted inventory onto Terraform addresses for import
    fn import_bindings(
        &self,
        desired: &DesiredConfig,
        inventory: &Inventory,
    ) -> Vec<ImportBinding>;

    fn renderer(&self, ssh_public_key: &str) -> Box<dyn DescriptorRenderer>;
}

/// Connect to a provider by name, probing authentication
pub fn connect(
    name: &str,
    project: &str,
    region: Option<&str>,
    timeout: Duration,
) -> Result<Box<dyn CloudProvider>, EngineError> {
    match name {
        "oci" => Ok(Box::new(oci::Oci::connect(project, region, timeout)?)),
        "gcp" => Ok(Box::new(gcp::Gcp::connect(project, region, timeout)?)),
        other => Err(EngineError::Prerequisite(format!(
            "unknown provider: {other} (expected oci or gcp)"
        ))),
    }
}

/// Instance import bindings shared by both providers
///
/// A desired hostname that matches a discovered instance of the same class
/// binds that instance to the count-indexed Terraform address the emitter
/// will generate for it.
pub(crate) fn instance_bindings(
    resource_type: &str,
    desired: &DesiredConfig,
    inventory: &Inventory,
) -> Vec<ImportBinding> {
    let mut bindings = Vec::new();
    for group in &desired.groups {
        for (index, host) in group
            .hostnames
            .iter()
            .enumerate()
            .take(group.count as usize)
        {
            if let Some(record) = inventory
                .instances_of_class(&group.class)
                .find(|r| r.display_name == *host)
            {
                bindings.push(ImportBinding {
                    address: format!("{resource_type}.{}[{index}]", group.class),
                    id: record.id.clone(),
                });
            }
        }
    }
    bindings
}

/// Bind a singleton resource (network, subnet) by display name
pub(crate) fn named_binding(
    inventory: &Inventory,
    kind: ResourceKind,
    display_name: &str,
    address: &str,
) -> Option<ImportBinding> {
    inventory
        .of(kind)
        .iter()
        .find(|r| r.display_name == display_name)
        .map(|r| ImportBinding {
            address: address.to_string(),
            id: r.id.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::{InstanceGroup, ResourceRecord};

    #[test]
    fn test_instance_bindings_match_by_hostname_and_class() {
        let mut inventory = Inventory::default();
        inventory.push(
            ResourceRecord::new(ResourceKind::ComputeInstance, "ocid-arm", "arm-1")
                .with_attr("class", "arm"),
        );
        inventory.push(
            ResourceRecord::new(ResourceKind::ComputeInstance, "ocid-amd", "arm-1")
                .with_attr("class", "amd"),
        );

        let desired = DesiredConfig {
            region: "r".into(),
            groups: vec![InstanceGroup {
                class: "arm".into(),
                count: 2,
                hostnames: vec!["arm-1".into(), "arm-2".into()],
                ocpus: 4,
                memory_gb: 24,
                boot_volume_gb: 47,
            }],
            block_volume_gb: vec![],
        };

        let bindings = instance_bindings("oci_core_instance", &desired, &inventory);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].address, "oci_core_instance.arm[0]");
        assert_eq!(bindings[0].id, "ocid-arm");
    }

    #[test]
    fn test_named_binding() {
        let mut inventory = Inventory::default();
        inventory.push(ResourceRecord::new(
            ResourceKind::Network,
            "ocid-vcn",
            "cumulo-vcn",
        ));

        let binding =
            named_binding(&inventory, ResourceKind::Network, "cumulo-vcn", "oci_core_vcn.vcn")
                .unwrap();
        assert_eq!(binding.id, "ocid-vcn");
        assert!(
            named_binding(&inventory, ResourceKind::Network, "other", "oci_core_vcn.vcn")
                .is_none()
        );
    }
}
