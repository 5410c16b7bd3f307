//! Validation - judge a desired config against the free-tier headroom

use crate::inventory::Inventory;
use crate::types::{
    DesiredConfig, Enforcement, Headroom, InstanceGroup, QuotaSpec, QuotaUnit, ResourceKind,
    ValidationVerdict, VerdictStatus,
};
use std::collections::BTreeMap;

/// Site-wide validation policy, provided by the cloud provider
#[derive(Debug, Clone, Copy)]
pub struct SitePolicy {
    /// Regions covered by the free tier; empty means any region
    pub free_regions: &'static [&'static str],
    /// Provider's minimum boot volume size
    pub min_boot_volume_gb: u64,
    /// Downgrade cost-related hard rejections to warnings
    ///
    /// Set when the operator explicitly allows paid resources. Never
    /// affects provider API constraints like the boot-volume minimum.
    pub escalate_hard_rejects: bool,
}

/// Validate a desired config against the quota tables
///
/// Demand charged against headroom is net-new: instances whose hostname
/// already appears in the discovered inventory for the same class are
/// adoptions, not additions. Every verdict is a pure function of its own
/// category's inputs, so verdict content is independent of quota order.
pub fn validate(
    desired: &DesiredConfig,
    inventory: &Inventory,
    quotas: &[QuotaSpec],
    headroom: &BTreeMap<&'static str, Headroom>,
    policy: &SitePolicy,
) -> Vec<ValidationVerdict> {
    let mut verdicts = Vec::new();

    verdicts.push(region_verdict(desired, policy));
    verdicts.push(boot_volume_verdict(desired, policy));

    for quota in quotas {
        let Some(head) = headroom.get(quota.category) else {
            continue;
        };
        verdicts.push(quota_verdict(quota, head, desired, inventory, policy));
    }

    verdicts
}

pub fn has_rejection(verdicts: &[ValidationVerdict]) -> bool {
    verdicts
        .iter()
        .any(|v| v.status == VerdictStatus::Rejected)
}

/// One-line summary of every rejection, for the final error
pub fn rejection_summary(verdicts: &[ValidationVerdict]) -> String {
    verdicts
        .iter()
        .filter(|v| v.status == VerdictStatus::Rejected)
        .map(|v| format!("{}: {}", v.category, v.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

fn region_verdict(desired: &DesiredConfig, policy: &SitePolicy) -> ValidationVerdict {
    let free = policy.free_regions;
    if free.is_empty() || free.contains(&desired.region.as_str()) {
        return ValidationVerdict {
            category: "region".into(),
            status: VerdictStatus::Accepted,
            reason: format!("region {} is covered by the free tier", desired.region),
        };
    }

    let reason = format!(
        "region {} is not in the free tier (free regions: {})",
        desired.region,
        free.join(", "),
    );
    ValidationVerdict {
        category: "region".into(),
        status: if policy.escalate_hard_rejects {
            VerdictStatus::Warned
        } else {
            VerdictStatus::Rejected
        },
        reason,
    }
}

fn boot_volume_verdict(desired: &DesiredConfig, policy: &SitePolicy) -> ValidationVerdict {
    // API constraint, never downgraded by the paid-resources escape hatch
    let too_small: Vec<&InstanceGroup> = desired
        .groups
        .iter()
        .filter(|g| g.count > 0 && g.boot_volume_gb < policy.min_boot_volume_gb)
        .collect();

    if let Some(group) = too_small.first() {
        return ValidationVerdict {
            category: "boot-volume".into(),
            status: VerdictStatus::Rejected,
            reason: format!(
                "group {} boot volume {} GB is below the provider minimum of {} GB",
                group.class, group.boot_volume_gb, policy.min_boot_volume_gb,
            ),
        };
    }

    ValidationVerdict {
        category: "boot-volume".into(),
        status: VerdictStatus::Accepted,
        reason: format!("all boot volumes >= {} GB", policy.min_boot_volume_gb),
    }
}

fn quota_verdict(
    quota: &QuotaSpec,
    head: &Headroom,
    desired: &DesiredConfig,
    inventory: &Inventory,
    policy: &SitePolicy,
) -> ValidationVerdict {
    let category = quota.category.to_string();

    if quota.enforcement == Enforcement::Soft {
        // soft quotas never gate; they flag cost traps
        let status = if head.used > quota.limit {
            VerdictStatus::Warned
        } else {
            VerdictStatus::Accepted
        };
        return ValidationVerdict {
            category,
            status,
            reason: format!(
                "{}{} in use against a free allowance of {}{}",
                head.used, quota.unit, quota.limit, quota.unit,
            ),
        };
    }

    let demand = demand_for(quota, desired, inventory);
    if demand > head.remaining {
        let reason = format!(
            "requested {demand}{} new but only {}{} remain within the free tier ({}{} of {}{} in use)",
            quota.unit, head.remaining, quota.unit, head.used, quota.unit, quota.limit, quota.unit,
        );
        return ValidationVerdict {
            category,
            status: if policy.escalate_hard_rejects {
                VerdictStatus::Warned
            } else {
                VerdictStatus::Rejected
            },
            reason,
        };
    }

    ValidationVerdict {
        category,
        status: VerdictStatus::Accepted,
        reason: format!(
            "{demand}{} new fits in {}{} remaining",
            quota.unit, head.remaining, quota.unit,
        ),
    }
}

/// Net-new instances in a group: requested count minus hostname-matched
/// adoptions of the same class.
fn net_new_instances(group: &InstanceGroup, inventory: &Inventory) -> u64 {
    let adopted = group
        .hostnames
        .iter()
        .filter(|host| {
            inventory
                .instances_of_class(&group.class)
                .any(|record| record.display_name == **host)
        })
        .count() as u64;
    group.count.saturating_sub(adopted)
}

/// How much net-new usage the desired config adds under one quota
fn demand_for(quota: &QuotaSpec, desired: &DesiredConfig, inventory: &Inventory) -> u64 {
    match quota.kind {
        ResourceKind::ComputeInstance => desired
            .groups
            .iter()
            .filter(|g| quota.class.is_none_or(|class| g.class == class))
            .map(|g| net_new_instances(g, inventory) * per_instance(quota, g))
            .sum(),
        ResourceKind::Disk => {
            let boot: u64 = desired
                .groups
                .iter()
                .map(|g| net_new_instances(g, inventory) * g.boot_volume_gb)
                .sum();
            boot + desired.block_volume_gb.iter().sum::<u64>()
        }
        // one network is created only when none exists to adopt
        ResourceKind::Network => u64::from(inventory.count(ResourceKind::Network) == 0),
        _ => 0,
    }
}

fn per_instance(quota: &QuotaSpec, group: &InstanceGroup) -> u64 {
    match quota.unit {
        QuotaUnit::Count => 1,
        QuotaUnit::Ocpus => group.ocpus,
        QuotaUnit::Gigabytes => group.memory_gb,
    }
}
