//! Resource discovery - list what exists, normalize it, tolerate partial failure

use crate::types::{EngineError, ResourceKind, ResourceRecord};
use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;

/// Lifecycle states that mean a resource no longer occupies quota
pub const DEFAULT_TERMINAL_STATES: &[&str] =
    &["TERMINATED", "TERMINATING", "DELETED", "DELETING"];

/// Read-only view of a cloud account
///
/// Implementations shell out to the provider CLI (or an SDK) and translate
/// raw records into [`ResourceRecord`]s. A record that cannot be normalized
/// is dropped by returning `None`.
pub trait ProviderQuery {
    /// Probe authentication; failure aborts discovery
    fn check_auth(&self) -> Result<(), EngineError>;

    /// List raw records of one kind
    fn query(&self, kind: ResourceKind) -> Result<Vec<Value>>;

    /// Translate one raw record; `None` drops it as malformed
    fn normalize(&self, kind: ResourceKind, raw: &Value) -> Option<ResourceRecord>;

    /// Lifecycle states excluded from the inventory
    fn terminal_states(&self) -> &[&str] {
        DEFAULT_TERMINAL_STATES
    }
}

/// Everything discovered, grouped by kind
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    records: BTreeMap<ResourceKind, Vec<ResourceRecord>>,
}

impl Inventory {
    pub fn push(&mut self, record: ResourceRecord) {
        self.records.entry(record.kind).or_default().push(record);
    }

    pub fn of(&self, kind: ResourceKind) -> &[ResourceRecord] {
        self.records.get(&kind).map_or(&[], Vec::as_slice)
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        self.of(kind).len()
    }

    pub fn total(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Kinds with at least one record, in stable order
    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.records
            .iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(&kind, _)| kind)
    }

    /// Discovered instances of a class, e.g. every "arm" instance
    pub fn instances_of_class<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a ResourceRecord> {
        self.of(ResourceKind::ComputeInstance)
            .iter()
            .filter(move |r| r.attr("class") == Some(class))
    }
}

/// Discover the account's inventory
///
/// Authentication failure is fatal. A failed or malformed listing for one
/// kind degrades to an empty list with a warning so that one flaky API does
/// not block the pipeline; records in terminal lifecycle states are
/// excluded. Queries run sequentially and never mutate anything.
pub fn discover(
    provider: &dyn ProviderQuery,
    kinds: &[ResourceKind],
) -> Result<Inventory, EngineError> {
    provider.check_auth()?;

    let mut inventory = Inventory::default();
    for &kind in kinds {
        let raw = match provider.query(kind) {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!("{kind} discovery failed, treating as empty: {err:#}");
                continue;
            }
        };

        for value in &raw {
            let Some(record) = provider.normalize(kind, value) else {
                log::warn!("skipping malformed {kind} record");
                continue;
            };
            if is_terminal(&record, provider.terminal_states()) {
                log::debug!("excluding {kind} {} (terminal state)", record.display_name);
                continue;
            }
            inventory.push(record);
        }
        log::debug!("discovered {} {kind} record(s)", inventory.count(kind));
    }

    Ok(inventory)
}

fn is_terminal(record: &ResourceRecord, terminal: &[&str]) -> bool {
    record
        .attr("state")
        .is_some_and(|state| terminal.iter().any(|t| state.eq_ignore_ascii_case(t)))
}
