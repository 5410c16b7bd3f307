//! Google Cloud Platform - always-free tier
//!
//! Free allowances: one e2-micro instance in us-west1, us-central1 or
//! us-east1, 30 GB of standard persistent disk, and 5 GB of bucket
//! storage. A static external IP is free only while attached; reserved
//! but unattached addresses accrue charges, so they are flagged as a soft
//! quota. Note that a stopped GCP instance reports status TERMINATED but
//! still holds its name and disks, so TERMINATED is not a terminal state
//! here.

use super::{instance_bindings, named_binding, CloudProvider};
use crate::emitter::GcpRenderer;
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

const FREE_REGIONS: &[&str] = &["us-west1", "us-central1", "us-east1"];
const FREE_MACHINE_TYPE: &str = "e2-micro";
const MIN_BOOT_VOLUME_GB: u64 = 10;
const FREE_PD_GB: u64 = 30;

pub const QUOTAS: &[QuotaSpec] = &[
    QuotaSpec {
        category: "micro-instances",
        kind: ResourceKind::ComputeInstance,
        unit: QuotaUnit::Count,
        limit: 1,
        class: Some("micro"),
        usage_attr: None,
        enforcement: Enforcement::Hard,
    },
    QuotaSpec {
        category: "pd-storage",
        kind: ResourceKind::Disk,
        unit: QuotaUnit::Gigabytes,
        limit: FREE_PD_GB,
        class: None,
        usage_attr: Some("size_gb"),
        enforcement: Enforcement::Hard,
    },
    // soft: nothing here creates buckets, but stored data beyond the
    // allowance accrues charges
    QuotaSpec {
        category: "bucket-storage",
        kind: ResourceKind::Bucket,
        unit: QuotaUnit::Gigabytes,
        limit: 5,
        class: None,
        usage_attr: Some("size_gb"),
        enforcement: Enforcement::Soft,
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
    ResourceKind::FirewallRule,
    ResourceKind::ComputeInstance,
    ResourceKind::Disk,
    ResourceKind::ReservedAddress,
    ResourceKind::Bucket,
];

const RETRYABLE: &[&str] = &[
    "resource pool exhausted",
    "zone_resource_pool_exhausted",
    "ratelimitexceeded",
    "rate limit",
];

pub struct Gcp {
    project: String,
    region: String,
    timeout: Duration,
}

impl Gcp {
    pub fn connect(
        project: &str,
        region: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        if !command_exists("gcloud") {
            return Err(EngineError::Prerequisite(
                "gcloud CLI not found on PATH (install the Google Cloud SDK)".into(),
            ));
        }

        let gcp = Self {
            project: project.to_string(),
            region: region.unwrap_or("us-west1").to_string(),
            timeout,
        };
        gcp.check_auth()?;
        log::info!("connected to GCP project {project}, region {}", gcp.region);
        Ok(gcp)
    }

    fn query_json(&self, args: &[&str]) -> Result<Vec<Value>> {
        let mut full: Vec<&str> = args.to_vec();
        let project_flag = format!("--project={}", self.project);
        full.push(&project_flag);
        full.push("--format=json");

        let stdout = run_capture("gcloud", &full, self.timeout)?;
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&stdout).context("Invalid JSON from gcloud")
    }

    /// Total stored size of a bucket in whole GB, rounded up
    ///
    /// `gcloud storage buckets list` does not report size, so each bucket
    /// is summed with `gcloud storage du`. A failed sizing degrades to an
    /// unsized record rather than failing discovery.
    fn bucket_size_gb(&self, name: &str) -> Option<u64> {
        let url = format!("gs://{name}");
        let project = format!("--project={}", self.project);
        match run_capture(
            "gcloud",
            &["storage", "du", "--summarize", &url, &project],
            self.timeout,
        ) {
            Ok(out) => parse_du_bytes(&out).map(|bytes| bytes.div_ceil(1 << 30)),
            Err(err) => {
                log::warn!("could not size bucket {name}: {err:#}");
                None
            }
        }
    }

    /// Free-tier zone within a region (us-east1 has no "-a" zone)
    fn zone(&self) -> String {
        if self.region == "us-east1" {
            format!("{}-b", self.region)
        } else {
            format!("{}-a", self.region)
        }
    }
}

impl ProviderQuery for Gcp {
    fn check_auth(&self) -> Result<(), EngineError> {
        let accounts = run_capture(
            "gcloud",
            &["auth", "list", "--filter=status:ACTIVE", "--format=json"],
            self.timeout,
        )
        .and_then(|out| {
            serde_json::from_str::<Vec<Value>>(&out).context("Invalid JSON from gcloud")
        })
        .map_err(|err| EngineError::Auth(format!("{err:#}")))?;

        if accounts.is_empty() {
            return Err(EngineError::Auth(
                "no active gcloud account (run: gcloud auth login)".into(),
            ));
        }
        Ok(())
    }

    fn query(&self, kind: ResourceKind) -> Result<Vec<Value>> {
        match kind {
            ResourceKind::ComputeInstance => self.query_json(&["compute", "instances", "list"]),
            ResourceKind::Disk => self.query_json(&["compute", "disks", "list"]),
            ResourceKind::Network => self.query_json(&["compute", "networks", "list"]),
            ResourceKind::Subnet => {
                self.query_json(&["compute", "networks", "subnets", "list"])
            }
            ResourceKind::FirewallRule => {
                self.query_json(&["compute", "firewall-rules", "list"])
            }
            ResourceKind::ReservedAddress => self.query_json(&["compute", "addresses", "list"]),
            ResourceKind::Bucket => {
                let mut buckets = self.query_json(&["storage", "buckets", "list"])?;
                for bucket in &mut buckets {
                    let size_gb = bucket
                        .get("name")
                        .and_then(Value::as_str)
                        .and_then(|name| self.bucket_size_gb(name));
                    if let (Some(size_gb), Some(map)) = (size_gb, bucket.as_object_mut()) {
                        map.insert("sizeGb".to_string(), Value::from(size_gb));
                    }
                }
                Ok(buckets)
            }
            // GCP has no standalone gateway resource to discover
            ResourceKind::Gateway => Ok(Vec::new()),
        }
    }

    fn normalize(&self, kind: ResourceKind, raw: &Value) -> Option<ResourceRecord> {
        normalize_gcp(kind, raw)
    }

    fn terminal_states(&self) -> &[&str] {
        // TERMINATED just means stopped on GCP
        &["DELETING"]
    }
}

fn basename(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// Byte count from `gcloud storage du --summarize` ("<bytes>  gs://name")
fn parse_du_bytes(output: &str) -> Option<u64> {
    output.split_whitespace().next()?.parse().ok()
}

fn normalize_gcp(kind: ResourceKind, raw: &Value) -> Option<ResourceRecord> {
    let str_of = |key: &str| raw.get(key).and_then(Value::as_str);
    let name = str_of("name")?;

    match kind {
        ResourceKind::ComputeInstance => {
            let machine_type = basename(str_of("machineType")?);
            let class = if machine_type == FREE_MACHINE_TYPE {
                "micro".to_string()
            } else {
                machine_type.to_string()
            };
            // names are the stable identity gcloud and terraform both use
            let mut record = ResourceRecord::new(kind, name, name).with_attr("class", class);
            if let Some(status) = str_of("status") {
                record = record.with_attr("state", status);
            }
            Some(record)
        }
        ResourceKind::Disk => {
            // sizeGb arrives as a JSON string
            let size_gb: u64 = str_of("sizeGb")?.parse().ok()?;
            let mut record = ResourceRecord::new(kind, name, name).with_attr("size_gb", size_gb);
            if let Some(user) = raw
                .get("users")
                .and_then(Value::as_array)
                .and_then(|users| users.first())
                .and_then(Value::as_str)
            {
                record = record.with_attr("attached_to", basename(user));
            }
            Some(record)
        }
        ResourceKind::ReservedAddress => {
            let reserved = str_of("status") == Some("RESERVED");
            let unattached = reserved
                && raw
                    .get("users")
                    .and_then(Value::as_array)
                    .is_none_or(Vec::is_empty);
            let mut record = ResourceRecord::new(kind, name, name)
                .with_attr("class", if unattached { "unattached" } else { "attached" });
            if let Some(address) = str_of("address") {
                record = record.with_attr("address", address);
            }
            Some(record)
        }
        ResourceKind::Bucket => {
            let mut record = ResourceRecord::new(kind, name, name);
            if let Some(size_gb) = raw.get("sizeGb").and_then(Value::as_u64) {
                record = record.with_attr("size_gb", size_gb);
            }
            Some(record)
        }
        ResourceKind::Network
        | ResourceKind::Subnet
        | ResourceKind::Gateway
        | ResourceKind::FirewallRule => Some(ResourceRecord::new(kind, name, name)),
    }
}

impl CloudProvider for Gcp {
    fn name(&self) -> &'static str {
        "gcp"
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
            free_regions: FREE_REGIONS,
            min_boot_volume_gb: MIN_BOOT_VOLUME_GB,
            escalate_hard_rejects: false,
        }
    }

    fn defaults(&self) -> DesiredConfig {
        DesiredConfig {
            region: self.region.clone(),
            groups: vec![InstanceGroup {
                class: "micro".into(),
                count: 1,
                hostnames: vec!["free-1".into()],
                ocpus: 1,
                memory_gb: 1,
                boot_volume_gb: FREE_PD_GB,
            }],
            block_volume_gb: vec![],
        }
    }

    fn maximum_config(&self, headroom: &BTreeMap<&'static str, Headroom>) -> DesiredConfig {
        let remaining = |category: &str| headroom.get(category).map_or(0, |h| h.remaining);

        let count = remaining("micro-instances");
        let boot = if count > 0 {
            (remaining("pd-storage") / count).max(MIN_BOOT_VOLUME_GB)
        } else {
            FREE_PD_GB
        };

        DesiredConfig {
            region: self.region.clone(),
            groups: if count > 0 {
                vec![InstanceGroup {
                    class: "micro".into(),
                    count,
                    hostnames: (1..=count).map(|i| format!("free-{i}")).collect(),
                    ocpus: 1,
                    memory_gb: 1,
                    boot_volume_gb: boot,
                }]
            } else {
                vec![]
            },
            block_volume_gb: vec![],
        }
    }

    fn import_bindings(
        &self,
        desired: &DesiredConfig,
        inventory: &Inventory,
    ) -> Vec<ImportBinding> {
        let mut bindings = instance_bindings("google_compute_instance", desired, inventory);
        bindings.extend(named_binding(
            inventory,
            ResourceKind::Network,
            "cumulo-network",
            "google_compute_network.network",
        ));
        bindings.extend(named_binding(
            inventory,
            ResourceKind::Subnet,
            "cumulo-subnet",
            "google_compute_subnetwork.subnet",
        ));
        bindings
    }

    fn renderer(&self, ssh_public_key: &str) -> Box<dyn DescriptorRenderer> {
        Box::new(GcpRenderer {
            project: self.project.clone(),
            region: self.region.clone(),
            zone: self.zone(),
            ssh_public_key: ssh_public_key.to_string(),
            quotas: QUOTAS,
        })
    }
}
