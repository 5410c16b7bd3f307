//! Configuration resolution - layer explicit, persisted, derived and default sources

use crate::inventory::Inventory;
use crate::types::{DesiredConfig, InstanceGroup, ResourceKind};
use std::collections::{BTreeMap, BTreeSet};

/// The candidate sources, highest priority first
pub struct ResolveSources<'a> {
    /// Operator-supplied config file
    pub explicit: Option<&'a DesiredConfig>,
    /// Config persisted by the last successful apply
    pub persisted: Option<&'a DesiredConfig>,
    /// Inventory to derive an adopt-what-exists config from
    pub inventory: &'a Inventory,
    /// Provider defaults (or the maximum free-tier fill)
    pub defaults: &'a DesiredConfig,
}

/// Resolve the effective desired config
///
/// Precedence is strict and per-logical-group: explicit > persisted >
/// inventory-derived > defaults. A group is taken wholesale from the
/// highest-priority source that defines its class, never merged
/// field-by-field. Region and the extra block volume list follow the same
/// precedence. Deterministic: identical inputs resolve to configs with
/// byte-identical signatures.
pub fn resolve(sources: &ResolveSources) -> DesiredConfig {
    let derived = derive_from_inventory(sources.inventory, sources.defaults);

    let chain: Vec<&DesiredConfig> = [
        sources.explicit,
        sources.persisted,
        derived.as_ref(),
        Some(sources.defaults),
    ]
    .into_iter()
    .flatten()
    .collect();

    let region = chain
        .iter()
        .map(|c| c.region.as_str())
        .find(|r| !r.is_empty())
        .unwrap_or_default()
        .to_string();

    // the highest-priority source owns the block volume list, even when empty
    let block_volume_gb = chain[0].block_volume_gb.clone();

    let mut groups = Vec::new();
    let mut claimed: BTreeSet<&str> = BTreeSet::new();
    for config in &chain {
        for group in &config.groups {
            if claimed.insert(group.class.as_str()) {
                groups.push(group.clone());
            }
        }
    }

    DesiredConfig {
        region,
        groups,
        block_volume_gb,
    }
}

/// Derive an adopt-what-exists config from the inventory
///
/// Instances are grouped by their `class` attribute and sorted by id so the
/// synthesis is deterministic. Hostnames reuse the discovered display names
/// and shapes come from record attributes; boot volume sizes are matched
/// from disk records through the `attached_to` attribute, falling back to
/// the default group's sizing. Adoption never renames or resizes anything.
/// Returns `None` when no instances were discovered.
pub fn derive_from_inventory(
    inventory: &Inventory,
    defaults: &DesiredConfig,
) -> Option<DesiredConfig> {
    let mut by_class: BTreeMap<&str, Vec<&crate::types::ResourceRecord>> = BTreeMap::new();
    for record in inventory.of(ResourceKind::ComputeInstance) {
        let Some(class) = record.attr("class") else {
            log::warn!(
                "instance {} has no class attribute; not adoptable",
                record.display_name
            );
            continue;
        };
        by_class.entry(class).or_default().push(record);
    }

    if by_class.is_empty() {
        return None;
    }

    let mut groups = Vec::new();
    for (class, mut records) in by_class {
        records.sort_by(|a, b| a.id.cmp(&b.id));
        let fallback = defaults.group(class);

        let boot_volume_gb = records
            .iter()
            .filter_map(|record| attached_boot_size(inventory, &record.id))
            .max()
            .or_else(|| fallback.map(|g| g.boot_volume_gb))
            .unwrap_or(0);

        groups.push(InstanceGroup {
            class: class.to_string(),
            count: records.len() as u64,
            hostnames: records.iter().map(|r| r.display_name.clone()).collect(),
            ocpus: records
                .iter()
                .filter_map(|r| r.attr_u64("ocpus"))
                .max()
                .or_else(|| fallback.map(|g| g.ocpus))
                .unwrap_or(1),
            memory_gb: records
                .iter()
                .filter_map(|r| r.attr_u64("memory_gb"))
                .max()
                .or_else(|| fallback.map(|g| g.memory_gb))
                .unwrap_or(1),
            boot_volume_gb,
        });
    }

    Some(DesiredConfig {
        // the inventory does not carry a region; defer down the chain
        region: String::new(),
        groups,
        block_volume_gb: Vec::new(),
    })
}

fn attached_boot_size(inventory: &Inventory, instance_id: &str) -> Option<u64> {
    inventory
        .of(ResourceKind::Disk)
        .iter()
        .find(|disk| disk.attr("attached_to") == Some(instance_id))
        .and_then(|disk| disk.attr_u64("size_gb"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceRecord;

    fn group(class: &str, count: u64, boot: u64) -> InstanceGroup {
        InstanceGroup {
            class: class.into(),
            count,
            hostnames: (1..=count).map(|i| format!("{class}-{i}")).collect(),
            ocpus: 1,
            memory_gb: 1,
            boot_volume_gb: boot,
        }
    }

    fn defaults() -> DesiredConfig {
        DesiredConfig {
            region: "us-west1".into(),
            groups: vec![group("amd", 2, 47), group("arm", 1, 47)],
            block_volume_gb: vec![],
        }
    }

    fn arm_record(id: &str, name: &str) -> ResourceRecord {
        ResourceRecord::new(ResourceKind::ComputeInstance, id, name)
            .with_attr("class", "arm")
            .with_attr("ocpus", 4)
            .with_attr("memory_gb", 24)
    }

    #[test]
    fn test_defaults_win_when_nothing_else_present() {
        let inventory = Inventory::default();
        let resolved = resolve(&ResolveSources {
            explicit: None,
            persisted: None,
            inventory: &inventory,
            defaults: &defaults(),
        });
        assert_eq!(resolved, defaults());
    }

    #[test]
    fn test_explicit_group_shadows_all_other_sources() {
        let explicit = DesiredConfig {
            region: "us-central1".into(),
            groups: vec![group("arm", 1, 100)],
            block_volume_gb: vec![50],
        };
        let persisted = DesiredConfig {
            region: "us-east1".into(),
            groups: vec![group("arm", 4, 47)],
            block_volume_gb: vec![],
        };

        let inventory = Inventory::default();
        let resolved = resolve(&ResolveSources {
            explicit: Some(&explicit),
            persisted: Some(&persisted),
            inventory: &inventory,
            defaults: &defaults(),
        });

        // arm comes wholesale from explicit, amd falls through to defaults
        assert_eq!(resolved.region, "us-central1");
        assert_eq!(resolved.group("arm").unwrap().boot_volume_gb, 100);
        assert_eq!(resolved.group("arm").unwrap().count, 1);
        assert_eq!(resolved.group("amd").unwrap().count, 2);
        assert_eq!(resolved.block_volume_gb, vec![50]);
    }

    #[test]
    fn test_persisted_beats_derived_and_defaults() {
        let persisted = DesiredConfig {
            region: String::new(),
            groups: vec![group("arm", 2, 60)],
            block_volume_gb: vec![],
        };
        let mut inventory = Inventory::default();
        inventory.push(arm_record("i-1", "existing-arm"));

        let resolved = resolve(&ResolveSources {
            explicit: None,
            persisted: Some(&persisted),
            inventory: &inventory,
            defaults: &defaults(),
        });

        assert_eq!(resolved.group("arm").unwrap().count, 2);
        // empty persisted region falls through to the defaults
        assert_eq!(resolved.region, "us-west1");
    }

    #[test]
    fn test_derivation_adopts_names_and_shapes() {
        let mut inventory = Inventory::default();
        inventory.push(arm_record("i-2", "worker"));
        inventory.push(arm_record("i-1", "gateway"));
        inventory.push(
            ResourceRecord::new(ResourceKind::Disk, "d-1", "boot")
                .with_attr("size_gb", 60)
                .with_attr("attached_to", "i-1"),
        );

        let derived = derive_from_inventory(&inventory, &defaults()).unwrap();
        let arm = derived.group("arm").unwrap();

        // sorted by id, names preserved
        assert_eq!(arm.hostnames, vec!["gateway", "worker"]);
        assert_eq!(arm.count, 2);
        assert_eq!(arm.ocpus, 4);
        assert_eq!(arm.memory_gb, 24);
        assert_eq!(arm.boot_volume_gb, 60);
    }

    #[test]
    fn test_derivation_falls_back_to_default_sizing() {
        let mut inventory = Inventory::default();
        inventory.push(
            ResourceRecord::new(ResourceKind::ComputeInstance, "i-1", "amd-old")
                .with_attr("class", "amd"),
        );

        let derived = derive_from_inventory(&inventory, &defaults()).unwrap();
        assert_eq!(derived.group("amd").unwrap().boot_volume_gb, 47);
    }

    #[test]
    fn test_empty_inventory_derives_nothing() {
        assert!(derive_from_inventory(&Inventory::default(), &defaults()).is_none());
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let mut inventory = Inventory::default();
        inventory.push(arm_record("i-1", "gateway"));
        inventory.push(arm_record("i-2", "worker"));

        let sources = ResolveSources {
            explicit: None,
            persisted: None,
            inventory: &inventory,
            defaults: &defaults(),
        };
        let first = resolve(&sources).signature();
        let second = resolve(&sources).signature();
        assert_eq!(first, second);
    }
}
