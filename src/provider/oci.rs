//! Oracle Cloud Infrastructure - always-free tier
//!
//! Free allowances: 2 AMD micro instances, 4 ARM OCPUs and 24 GB of memory
//! across at most 4 A1.Flex instances, 200 GB of block/boot storage in at
//! least 47 GB volumes, and 2 VCNs. Capacity errors ("out of host
//! capacity") are chronic in free ADs and always worth retrying.

use super::{instance_bindings, named_binding, CloudProvider};
use crate::emitter::OciRenderer;
use crate::runner::{command_exists, run_capture};
use anyhow::{Context, Result};
use reconcile::{
    DescriptorRenderer, DesiredConfig, Enforcement, EngineError, Headroom, ImportBinding,
    InstanceGroup, Inventory, ProviderQuery, QuotaSpec, QuotaUnit, ResourceKind, ResourceRecord,
    SitePolicy,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

const AMD_SHAPE: &str = "VM.Standard.E2.1.Micro";
const ARM_SHAPE: &str = "VM.Standard.A1.Flex";
const MIN_BOOT_VOLUME_GB: u64 = 47;

pub const QUOTAS: &[QuotaSpec] = &[
    QuotaSpec {
        category: "amd-instances",
        kind: ResourceKind::ComputeInstance,
        unit: QuotaUnit::Count,
        limit: 2,
        class: Some("amd"),
        usage_attr: None,
        enforcement: Enforcement::Hard,
    },
    QuotaSpec {
        category: "arm-instances",
        kind: ResourceKind::ComputeInstance,
        unit: QuotaUnit::Count,
        limit: 4,
        class: Some("arm"),
        usage_attr: None,
        enforcement: Enforcement::Hard,
    },
    QuotaSpec {
        category: "arm-ocpus",
        kind: ResourceKind::ComputeInstance,
        unit: QuotaUnit::Ocpus,
        limit: 4,
        class: Some("arm"),
        usage_attr: Some("ocpus"),
        enforcement: Enforcement::Hard,
    },
    QuotaSpec {
        category: "arm-memory",
        kind: ResourceKind::ComputeInstance,
        unit: QuotaUnit::Gigabytes,
        limit: 24,
        class: Some("arm"),
        usage_attr: Some("memory_gb"),
        enforcement: Enforcement::Hard,
    },
    QuotaSpec {
        category: "block-storage",
        kind: ResourceKind::Disk,
        unit: QuotaUnit::Gigabytes,
        limit: 200,
        class: None,
        usage_attr: Some("size_gb"),
        enforcement: Enforcement::Hard,
    },
    QuotaSpec {
        category: "vcns",
        kind: ResourceKind::Network,
        unit: QuotaUnit::Count,
        limit: 2,
        class: None,
        usage_attr: None,
        enforcement: Enforcement::Hard,
    },
    QuotaSpec {
        category: "reserved-addresses",
        kind: ResourceKind::ReservedAddress,
        unit: QuotaUnit::Count,
        limit: 0,
        class: Some("unattached"),
        usage_attr: None,
        enforcement: Enforcement::Soft,
    },
];

const KINDS: &[ResourceKind] = &[
    ResourceKind::Network,
    ResourceKind::Subnet,
    ResourceKind::Gateway,
    ResourceKind::FirewallRule,
    ResourceKind::ComputeInstance,
    ResourceKind::Disk,
    ResourceKind::ReservedAddress,
    ResourceKind::Bucket,
];

const RETRYABLE: &[&str] = &[
    "out of host capacity",
    "out of capacity",
    "internalerror",
    "toomanyrequests",
    "limitexceeded",
    "rate limit",
];

pub struct Oci {
    compartment_id: String,
    region: String,
    availability_domain: String,
    timeout: Duration,
}

impl Oci {
    /// Connect: verify the CLI is installed, probe authentication and
    /// resolve the first availability domain
    pub fn connect(
        compartment_id: &str,
        region: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        if !command_exists("oci") {
            return Err(EngineError::Prerequisite(
                "oci CLI not found on PATH (install oracle oci-cli)".into(),
            ));
        }

        let availability_domain = first_availability_domain(compartment_id, timeout)
            .map_err(|err| EngineError::Auth(format!("{err:#}")))?;

        let region = match region {
            Some(region) => region.to_string(),
            None => home_region(compartment_id, timeout)
                .map_err(|err| EngineError::Auth(format!("{err:#}")))?,
        };

        log::info!("connected to OCI region {region}, AD {availability_domain}");
        Ok(Self {
            compartment_id: compartment_id.to_string(),
            region,
            availability_domain,
            timeout,
        })
    }

    fn query_json(&self, args: &[&str]) -> Result<Vec<Value>> {
        let stdout = run_capture("oci", args, self.timeout)?;
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        let value: Value = serde_json::from_str(&stdout).context("Invalid JSON from oci CLI")?;
        // oci wraps listings in {"data": [...]}
        match value.get("data") {
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(_) | None => anyhow::bail!("unexpected response shape from oci CLI"),
        }
    }
}

fn first_availability_domain(compartment_id: &str, timeout: Duration) -> Result<String> {
    let stdout = run_capture(
        "oci",
        &[
            "iam",
            "availability-domain",
            "list",
            "--compartment-id",
            compartment_id,
            "--output",
            "json",
        ],
        timeout,
    )?;
    let value: Value = serde_json::from_str(&stdout).context("Invalid JSON from oci CLI")?;
    value
        .get("data")
        .and_then(Value::as_array)
        .and_then(|ads| ads.first())
        .and_then(|ad| ad.get("name"))
        .and_then(Value::as_str)
        .map(String::from)
        .context("no availability domain visible in this tenancy")
}

fn home_region(compartment_id: &str, timeout: Duration) -> Result<String> {
    let stdout = run_capture(
        "oci",
        &[
            "iam",
            "region-subscription",
            "list",
            "--tenancy-id",
            compartment_id,
            "--output",
            "json",
        ],
        timeout,
    )?;
    let value: Value = serde_json::from_str(&stdout).context("Invalid JSON from oci CLI")?;
    value
        .get("data")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find(|sub| sub.get("is-home-region").and_then(Value::as_bool) == Some(true))
        .and_then(|sub| sub.get("region-name"))
        .and_then(Value::as_str)
        .map(String::from)
        .context("could not determine the home region; pass --region")
}

impl ProviderQuery for Oci {
    fn check_auth(&self) -> Result<(), EngineError> {
        first_availability_domain(&self.compartment_id, self.timeout)
            .map(|_| ())
            .map_err(|err| EngineError::Auth(format!("{err:#}")))
    }

    fn query(&self, kind: ResourceKind) -> Result<Vec<Value>> {
        let c = self.compartment_id.as_str();
        match kind {
            ResourceKind::ComputeInstance => self.query_json(&[
                "compute",
                "instance",
                "list",
                "--compartment-id",
                c,
                "--all",
            ]),
            ResourceKind::Disk => {
                // boot volumes are listed per AD; standalone volumes per
                // compartment
                let mut disks = self.query_json(&[
                    "bv",
                    "boot-volume",
                    "list",
                    "--compartment-id",
                    c,
                    "--availability-domain",
                    &self.availability_domain,
                    "--all",
                ])?;
                disks.extend(self.query_json(&[
                    "bv",
                    "volume",
                    "list",
                    "--compartment-id",
                    c,
                    "--all",
                ])?);
                Ok(disks)
            }
            ResourceKind::Network => {
                self.query_json(&["network", "vcn", "list", "--compartment-id", c, "--all"])
            }
            ResourceKind::Subnet => {
                self.query_json(&["network", "subnet", "list", "--compartment-id", c, "--all"])
            }
            ResourceKind::Gateway => self.query_json(&[
                "network",
                "internet-gateway",
                "list",
                "--compartment-id",
                c,
                "--all",
            ]),
            ResourceKind::FirewallRule => self.query_json(&[
                "network",
                "security-list",
                "list",
                "--compartment-id",
                c,
                "--all",
            ]),
            ResourceKind::ReservedAddress => self.query_json(&[
                "network",
                "public-ip",
                "list",
                "--compartment-id",
                c,
                "--scope",
                "REGION",
                "--all",
            ]),
            ResourceKind::Bucket => {
                let namespace = run_capture("oci", &["os", "ns", "get", "--output", "json"], self.timeout)?;
                let value: Value =
                    serde_json::from_str(&namespace).context("Invalid JSON from oci CLI")?;
                let namespace = value
                    .get("data")
                    .and_then(Value::as_str)
                    .context("could not resolve the object storage namespace")?
                    .to_string();
                self.query_json(&[
                    "os",
                    "bucket",
                    "list",
                    "--compartment-id",
                    c,
                    "--namespace-name",
                    &namespace,
                ])
            }
        }
    }

    fn normalize(&self, kind: ResourceKind, raw: &Value) -> Option<ResourceRecord> {
        normalize_oci(kind, raw)
    }
}

fn normalize_oci(kind: ResourceKind, raw: &Value) -> Option<ResourceRecord> {
    let str_of = |key: &str| raw.get(key).and_then(Value::as_str);
    let num_of = |key: &str| {
        raw.get(key)
            .and_then(Value::as_f64)
            .map(|n| n.round() as u64)
    };

    match kind {
        ResourceKind::ComputeInstance => {
            let id = str_of("id")?;
            let name = str_of("display-name")?;
            let shape = str_of("shape")?;
            let class = match shape {
                AMD_SHAPE => "amd".to_string(),
                ARM_SHAPE => "arm".to_string(),
                other => other.to_lowercase(),
            };
            let mut record = ResourceRecord::new(kind, id, name).with_attr("class", class);
            if let Some(state) = str_of("lifecycle-state") {
                record = record.with_attr("state", state);
            }
            if let Some(config) = raw.get("shape-config") {
                if let Some(ocpus) = config.get("ocpus").and_then(Value::as_f64) {
                    record = record.with_attr("ocpus", ocpus.round() as u64);
                }
                if let Some(memory) = config.get("memory-in-gbs").and_then(Value::as_f64) {
                    record = record.with_attr("memory_gb", memory.round() as u64);
                }
            }
            Some(record)
        }
        ResourceKind::Disk => {
            let id = str_of("id")?;
            let name = str_of("display-name")?;
            let mut record =
                ResourceRecord::new(kind, id, name).with_attr("size_gb", num_of("size-in-gbs")?);
            if let Some(state) = str_of("lifecycle-state") {
                record = record.with_attr("state", state);
            }
            if let Some(instance) = str_of("instance-id") {
                record = record.with_attr("attached_to", instance);
            }
            Some(record)
        }
        ResourceKind::ReservedAddress => {
            let id = str_of("id")?;
            let name = str_of("display-name").unwrap_or("public-ip");
            let attached = raw
                .get("assigned-entity-id")
                .is_some_and(|v| !v.is_null());
            let mut record = ResourceRecord::new(kind, id, name)
                .with_attr("class", if attached { "attached" } else { "unattached" });
            if let Some(ip) = str_of("ip-address") {
                record = record.with_attr("address", ip);
            }
            if let Some(state) = str_of("lifecycle-state") {
                record = record.with_attr("state", state);
            }
            Some(record)
        }
        ResourceKind::Bucket => {
            let name = str_of("name")?;
            Some(ResourceRecord::new(kind, name, name))
        }
        ResourceKind::Network
        | ResourceKind::Subnet
        | ResourceKind::Gateway
        | ResourceKind::FirewallRule => {
            let id = str_of("id")?;
            let name = str_of("display-name")?;
            let mut record = ResourceRecord::new(kind, id, name);
            if let Some(state) = str_of("lifecycle-state") {
                record = record.with_attr("state", state);
            }
            Some(record)
        }
    }
}

impl CloudProvider for Oci {
    fn name(&self) -> &'static str {
        "oci"
    }

    fn kinds(&self) -> &'static [ResourceKind] {
        KINDS
    }

    fn quotas(&self) -> &'static [QuotaSpec] {
        QUOTAS
    }

    fn retryable_signatures(&self) -> &'static [&'static str] {
        RETRYABLE
    }

    fn policy(&self) -> SitePolicy {
        SitePolicy {
            // the always-free allowance follows the home region
            free_regions: &[],
            min_boot_volume_gb: MIN_BOOT_VOLUME_GB,
            escalate_hard_rejects: false,
        }
    }

    fn defaults(&self) -> DesiredConfig {
        DesiredConfig {
            region: self.region.clone(),
            groups: vec![
                InstanceGroup {
                    class: "amd".into(),
                    count: 2,
                    hostnames: vec!["amd-1".into(), "amd-2".into()],
                    ocpus: 1,
                    memory_gb: 1,
                    boot_volume_gb: MIN_BOOT_VOLUME_GB,
                },
                InstanceGroup {
                    class: "arm".into(),
                    count: 1,
                    hostnames: vec!["arm-1".into()],
                    ocpus: 4,
                    memory_gb: 24,
                    boot_volume_gb: MIN_BOOT_VOLUME_GB,
                },
            ],
            block_volume_gb: vec![],
        }
    }

    fn maximum_config(&self, headroom: &BTreeMap<&'static str, Headroom>) -> DesiredConfig {
        maximum_config(&self.region, headroom)
    }

    fn import_bindings(
        &self,
        desired: &DesiredConfig,
        inventory: &Inventory,
    ) -> Vec<ImportBinding> {
        let mut bindings = instance_bindings("oci_core_instance", desired, inventory);
        bindings.extend(named_binding(
            inventory,
            ResourceKind::Network,
            "cumulo-vcn",
            "oci_core_vcn.vcn",
        ));
        bindings.extend(named_binding(
            inventory,
            ResourceKind::Subnet,
            "cumulo-subnet",
            "oci_core_subnet.subnet",
        ));
        // a VCN carries at most one internet gateway, so an unbound
        // existing gateway would make the apply plan an un-creatable second
        bindings.extend(named_binding(
            inventory,
            ResourceKind::Gateway,
            "cumulo-igw",
            "oci_core_internet_gateway.igw",
        ));
        bindings
    }

    fn renderer(&self, ssh_public_key: &str) -> Box<dyn DescriptorRenderer> {
        Box::new(OciRenderer {
            compartment_id: self.compartment_id.clone(),
            region: self.region.clone(),
            availability_domain: self.availability_domain.clone(),
            ssh_public_key: ssh_public_key.to_string(),
            quotas: QUOTAS,
        })
    }
}

/// Fill whatever free-tier headroom remains: every leftover AMD slot plus
/// one ARM instance sized to the leftover OCPUs and memory, boot volumes
/// splitting the remaining storage (never below the provider minimum).
fn maximum_config(
    region: &str,
    headroom: &BTreeMap<&'static str, Headroom>,
) -> DesiredConfig {
    let remaining = |category: &str| headroom.get(category).map_or(0, |h| h.remaining);

    let amd_count = remaining("amd-instances");
    let arm_ocpus = remaining("arm-ocpus");
    let arm_memory = remaining("arm-memory");
    let arm_count = u64::from(remaining("arm-instances") > 0 && arm_ocpus > 0 && arm_memory > 0);

    let total = amd_count + arm_count;
    let boot = if total > 0 {
        (remaining("block-storage") / total).max(MIN_BOOT_VOLUME_GB)
    } else {
        MIN_BOOT_VOLUME_GB
    };

    let mut groups = Vec::new();
    if amd_count > 0 {
        groups.push(InstanceGroup {
            class: "amd".into(),
            count: amd_count,
            hostnames: (1..=amd_count).map(|i| format!("amd-{i}")).collect(),
            ocpus: 1,
            memory_gb: 1,
            boot_volume_gb: boot,
        });
    }
    if arm_count > 0 {
        groups.push(InstanceGroup {
            class: "arm".into(),
            count: arm_count,
            hostnames: vec!["arm-1".into()],
            ocpus: arm_ocpus,
            memory_gb: arm_memory,
            boot_volume_gb: boot,
        });
    }

    DesiredConfig {
        region: region.to_string(),
        groups,
        block_volume_gb: vec![],
    }
}
