//! Core data model shared by every stage of the pipeline

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Resources
// ============================================================================

/// The kinds of cloud resources the engine tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Network,
    Subnet,
    Gateway,
    FirewallRule,
    ComputeInstance,
    Disk,
    ReservedAddress,
    Bucket,
}

impl ResourceKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Subnet => "subnet",
            Self::Gateway => "gateway",
            Self::FirewallRule => "firewall-rule",
            Self::ComputeInstance => "instance",
            Self::Disk => "disk",
            Self::ReservedAddress => "reserved-address",
            Self::Bucket => "bucket",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A normalized record of something that exists in the account
///
/// Records are immutable once built. Provider-specific detail lives in
/// `attributes`; the well-known keys are `class`, `state`, `ocpus`,
/// `memory_gb`, `size_gb` and `attached_to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub kind: ResourceKind,
    pub id: String,
    pub display_name: String,
    pub attributes: BTreeMap<String, String>,
}

impl ResourceRecord {
    pub fn new(kind: ResourceKind, id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            display_name: display_name.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute attachment
    pub fn with_attr(mut self, key: &str, value: impl ToString) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attr_u64(&self, key: &str) -> Option<u64> {
        self.attr(key).and_then(|v| v.parse().ok())
    }
}

// ============================================================================
// Quotas
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaUnit {
    Count,
    Gigabytes,
    Ocpus,
}

impl fmt::Display for QuotaUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Count => "",
            Self::Gigabytes => " GB",
            Self::Ocpus => " OCPUs",
        })
    }
}

/// How a quota is enforced
///
/// Hard quotas gate the apply; soft quotas only ever warn (e.g. resources
/// that are free to hold but accrue charges in certain states).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enforcement {
    Hard,
    Soft,
}

/// One free-tier limit
///
/// Quota tables are provider constants and the single source of truth for
/// every enforcement layer: the ledger, the validator and the descriptor
/// emitter all read the same table.
#[derive(Debug, Clone, Copy)]
pub struct QuotaSpec {
    /// Stable category name, e.g. "arm-ocpus"
    pub category: &'static str,
    pub kind: ResourceKind,
    pub unit: QuotaUnit,
    pub limit: u64,
    /// Restrict usage to records whose `class` attribute matches
    pub class: Option<&'static str>,
    /// Attribute summed per matching record; record count when `None`
    pub usage_attr: Option<&'static str>,
    pub enforcement: Enforcement,
}

impl QuotaSpec {
    /// Whether a record counts against this quota
    pub fn matches(&self, record: &ResourceRecord) -> bool {
        record.kind == self.kind
            && self
                .class
                .is_none_or(|class| record.attr("class") == Some(class))
    }

    /// How much a matching record consumes
    pub fn usage_of(&self, record: &ResourceRecord) -> u64 {
        match self.usage_attr {
            Some(attr) => record.attr_u64(attr).unwrap_or(0),
            None => 1,
        }
    }
}

/// Remaining room under one quota
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Headroom {
    pub category: &'static str,
    pub limit: u64,
    pub used: u64,
    /// Clamped at zero; never negative
    pub remaining: u64,
    /// Usage is already over the limit
    pub exceeded: bool,
}

// ============================================================================
// Desired configuration
// ============================================================================

/// A group of identically-shaped instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceGroup {
    /// Instance class, e.g. "amd", "arm", "micro"
    pub class: String,
    pub count: u64,
    /// Hostnames, in order; also the adoption identity
    #[serde(default)]
    pub hostnames: Vec<String>,
    pub ocpus: u64,
    pub memory_gb: u64,
    pub boot_volume_gb: u64,
}

/// The target shape of the account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredConfig {
    pub region: String,
    pub groups: Vec<InstanceGroup>,
    /// Extra block volumes (GB each) beyond instance boot volumes
    #[serde(default)]
    pub block_volume_gb: Vec<u64>,
}

impl DesiredConfig {
    pub fn total_instances(&self) -> u64 {
        self.groups.iter().map(|g| g.count).sum()
    }

    pub fn group(&self, class: &str) -> Option<&InstanceGroup> {
        self.groups.iter().find(|g| g.class == class)
    }

    /// Deterministic fingerprint of the config
    ///
    /// Identical configs always produce byte-identical signatures, so the
    /// signature doubles as the idempotence/drift check for persisted state.
    pub fn signature(&self) -> String {
        let mut sig = format!("region={}", self.region);
        for group in &self.groups {
            sig.push_str(&format!(
                ";{}:count={},ocpus={},memory={},boot={},hosts={}",
                group.class,
                group.count,
                group.ocpus,
                group.memory_gb,
                group.boot_volume_gb,
                group.hostnames.join("+"),
            ));
        }
        if !self.block_volume_gb.is_empty() {
            let volumes: Vec<String> = self.block_volume_gb.iter().map(u64::to_string).collect();
            sig.push_str(&format!(";volumes={}", volumes.join("+")));
        }
        sig
    }
}

// ============================================================================
// Verdicts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictStatus {
    Accepted,
    Rejected,
    Warned,
}

/// The validator's judgement for one category
#[derive(Debug, Clone)]
pub struct ValidationVerdict {
    pub category: String,
    pub status: VerdictStatus,
    pub reason: String,
}

// ============================================================================
// Tool output
// ============================================================================

/// Combined output of one external tool invocation
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub success: bool,
    pub timed_out: bool,
    /// stdout and stderr, interleaved as captured
    pub combined: String,
}

impl ToolOutput {
    pub fn ok(combined: impl Into<String>) -> Self {
        Self {
            success: true,
            timed_out: false,
            combined: combined.into(),
        }
    }

    pub fn failed(combined: impl Into<String>) -> Self {
        Self {
            success: false,
            timed_out: false,
            combined: combined.into(),
        }
    }
}

/// What a plan would do, parsed from the apply tool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub add: u64,
    pub change: u64,
    pub destroy: u64,
    pub destroyed_addresses: Vec<String>,
    pub replaced_addresses: Vec<String>,
}

impl PlanSummary {
    pub fn is_noop(&self) -> bool {
        self.add == 0 && self.change == 0 && self.destroy == 0
    }

    /// Addresses the plan would destroy or replace
    pub fn disturbed_addresses(&self) -> impl Iterator<Item = &String> {
        self.destroyed_addresses
            .iter()
            .chain(self.replaced_addresses.iter())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// The engine's error taxonomy
///
/// Callers map these onto process exit codes; everything that does not fit
/// a variant travels as `Other`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("missing prerequisite: {0}")]
    Prerequisite(String),

    #[error("desired configuration rejected: {0}")]
    ValidationRejected(String),

    #[error("{op} failed: {output}")]
    ToolFailed { op: &'static str, output: String },

    #[error("apply failed after {attempts} attempts: {output}")]
    RetriesExhausted { attempts: u32, output: String },

    #[error("plan would destroy or replace adopted resources; refused")]
    DriftRejected,

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arm_quota() -> QuotaSpec {
        QuotaSpec {
            category: "arm-ocpus",
            kind: ResourceKind::ComputeInstance,
            unit: QuotaUnit::Ocpus,
            limit: 4,
            class: Some("arm"),
            usage_attr: Some("ocpus"),
            enforcement: Enforcement::Hard,
        }
    }

    #[test]
    fn test_quota_matches_class() {
        let quota = arm_quota();
        let arm = ResourceRecord::new(ResourceKind::ComputeInstance, "ocid1", "arm-1")
            .with_attr("class", "arm")
            .with_attr("ocpus", 2);
        let amd = ResourceRecord::new(ResourceKind::ComputeInstance, "ocid2", "amd-1")
            .with_attr("class", "amd");

        assert!(quota.matches(&arm));
        assert!(!quota.matches(&amd));
        assert_eq!(quota.usage_of(&arm), 2);
    }

    #[test]
    fn test_quota_usage_defaults_to_count() {
        let quota = QuotaSpec {
            category: "vcns",
            kind: ResourceKind::Network,
            unit: QuotaUnit::Count,
            limit: 2,
            class: None,
            usage_attr: None,
            enforcement: Enforcement::Hard,
        };
        let vcn = ResourceRecord::new(ResourceKind::Network, "vcn1", "main");
        assert_eq!(quota.usage_of(&vcn), 1);
    }

    #[test]
    fn test_signature_deterministic() {
        let config = DesiredConfig {
            region: "us-west1".into(),
            groups: vec![InstanceGroup {
                class: "arm".into(),
                count: 2,
                hostnames: vec!["a".into(), "b".into()],
                ocpus: 2,
                memory_gb: 12,
                boot_volume_gb: 47,
            }],
            block_volume_gb: vec![50],
        };
        assert_eq!(config.signature(), config.clone().signature());
        assert!(config.signature().contains("arm:count=2"));

        let mut other = config.clone();
        other.groups[0].count = 3;
        assert_ne!(config.signature(), other.signature());
    }

    #[test]
    fn test_plan_summary_disturbed() {
        let plan = PlanSummary {
            add: 1,
            change: 0,
            destroy: 1,
            destroyed_addresses: vec!["a.b[0]".into()],
            replaced_addresses: vec!["c.d".into()],
        };
        let disturbed: Vec<&String> = plan.disturbed_addresses().collect();
        assert_eq!(disturbed.len(), 2);
        assert!(!plan.is_noop());
    }

    #[test]
    fn test_desired_config_toml_roundtrip_shape() {
        // hostnames and block volumes are optional in hand-written configs
        let config: DesiredConfig = serde_json::from_str(
            r#"{"region":"us-west1","groups":[{"class":"micro","count":1,"ocpus":1,"memory_gb":1,"boot_volume_gb":30}]}"#,
        )
        .unwrap();
        assert!(config.groups[0].hostnames.is_empty());
        assert!(config.block_volume_gb.is_empty());
    }
}
