//! Quota ledger - aggregate usage against the free-tier limits

use crate::inventory::Inventory;
use crate::types::{Headroom, QuotaSpec};
use std::collections::BTreeMap;

/// Compute the remaining headroom under every quota
///
/// Pure aggregation over the inventory; recomputed from scratch on every
/// call so the ledger can never serve stale numbers. `remaining` is clamped
/// at zero, and usage already over the limit sets `exceeded` and logs a
/// warning (it can happen when resources were created outside this tool).
pub fn compute_headroom(
    quotas: &[QuotaSpec],
    inventory: &Inventory,
) -> BTreeMap<&'static str, Headroom> {
    let mut headroom = BTreeMap::new();
    for quota in quotas {
        let used: u64 = inventory
            .of(quota.kind)
            .iter()
            .filter(|record| quota.matches(record))
            .map(|record| quota.usage_of(record))
            .sum();

        let exceeded = used > quota.limit;
        if exceeded {
            log::warn!(
                "{}: usage {used}{} already exceeds the free-tier limit of {}{}",
                quota.category,
                quota.unit,
                quota.limit,
                quota.unit,
            );
        }

        headroom.insert(
            quota.category,
            Headroom {
                category: quota.category,
                limit: quota.limit,
                used,
                remaining: quota.limit.saturating_sub(used),
                exceeded,
            },
        );
    }
    headroom
}
