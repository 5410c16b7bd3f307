//! Command implementations

pub mod deploy;
pub mod doctor;
pub mod inventory;
pub mod validate;

use crate::cli::TargetArgs;
use crate::provider::{self, CloudProvider};
use crate::state::PersistedState;
use crate::{config, ui};
use anyhow::Result;
use reconcile::{
    compute_headroom, discover, has_rejection, rejection_summary, resolve, DesiredConfig,
    EngineError, Headroom, Inventory, ProviderQuery, ResolveSources, ValidationVerdict,
};
use std::collections::BTreeMap;
use std::time::Duration;

pub(crate) struct Discovered {
    pub provider: Box<dyn CloudProvider>,
    pub inventory: Inventory,
    pub headroom: BTreeMap<&'static str, Headroom>,
}

/// Connect, discover the inventory and compute headroom - the shared
/// front half of every pipeline
pub(crate) fn connect_and_discover(args: &TargetArgs) -> Result<Discovered> {
    let provider = provider::connect(
        args.provider.name(),
        &args.project,
        args.region.as_deref(),
        Duration::from_secs(args.command_timeout),
    )?;

    let query: &dyn ProviderQuery = &*provider;
    let inventory = discover(query, provider.kinds())?;
    log::info!("discovered {} resource(s)", inventory.total());

    let headroom = compute_headroom(provider.quotas(), &inventory);
    Ok(Discovered {
        provider,
        inventory,
        headroom,
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum StartingPoint {
    Defaults,
    Maximum,
    Adopt,
}

/// Resolve the effective desired config from all sources
pub(crate) fn resolve_desired(
    args: &TargetArgs,
    discovered: &Discovered,
    interactive: bool,
) -> Result<DesiredConfig> {
    let explicit = args
        .config
        .as_deref()
        .map(config::load_desired_config)
        .transpose()?;
    let persisted =
        PersistedState::load(discovered.provider.name())?.map(|state| state.desired);

    let choice = starting_point(
        args,
        &discovered.inventory,
        explicit.is_some() || persisted.is_some(),
        interactive,
    )?;

    let defaults = match choice {
        StartingPoint::Maximum => discovered.provider.maximum_config(&discovered.headroom),
        _ => discovered.provider.defaults(),
    };

    let empty = Inventory::default();
    let mut desired = resolve(&ResolveSources {
        explicit: explicit.as_ref(),
        persisted: persisted.as_ref(),
        inventory: if choice == StartingPoint::Adopt {
            &discovered.inventory
        } else {
            &empty
        },
        defaults: &defaults,
    });

    // an explicit --region outranks every config source
    if let Some(region) = args.region.as_deref().filter(|r| !r.is_empty()) {
        if desired.region != region {
            log::info!("region {} overridden to {region}", desired.region);
            desired.region = region.to_string();
        }
    }
    Ok(desired)
}

fn starting_point(
    args: &TargetArgs,
    inventory: &Inventory,
    has_config_source: bool,
    interactive: bool,
) -> Result<StartingPoint> {
    if args.use_existing {
        return Ok(StartingPoint::Adopt);
    }
    if args.max {
        return Ok(StartingPoint::Maximum);
    }

    let existing = inventory.count(reconcile::ResourceKind::ComputeInstance);
    if has_config_source || existing == 0 || args.non_interactive || !interactive {
        return Ok(StartingPoint::Defaults);
    }

    // instances exist but nothing says what to do with them; ask
    let selection = dialoguer::Select::new()
        .with_prompt(format!(
            "{existing} instance(s) already exist. Start from"
        ))
        .items(&[
            "adopt what already exists",
            "the default configuration",
            "the maximum the free tier allows",
        ])
        .default(0)
        .interact()?;

    Ok(match selection {
        0 => StartingPoint::Adopt,
        2 => StartingPoint::Maximum,
        _ => StartingPoint::Defaults,
    })
}

/// Print the verdicts and fail on any rejection
pub(crate) fn gate_verdicts(verdicts: &[ValidationVerdict]) -> Result<()> {
    ui::verdict_table(verdicts);
    if has_rejection(verdicts) {
        return Err(EngineError::ValidationRejected(rejection_summary(verdicts)).into());
    }
    Ok(())
}

/// Describe the resolved config to the operator
pub(crate) fn print_desired(desired: &DesiredConfig) {
    ui::section("Desired configuration");
    ui::kv("region", &desired.region);
    for group in &desired.groups {
        ui::kv(
            &group.class,
            &format!(
                "{} instance(s), {} OCPU / {} GB each, {} GB boot, hosts [{}]",
                group.count,
                group.ocpus,
                group.memory_gb,
                group.boot_volume_gb,
                group.hostnames.join(", ")
            ),
        );
    }
    if !desired.block_volume_gb.is_empty() {
        let volumes: Vec<String> = desired.block_volume_gb.iter().map(u64::to_string).collect();
        ui::kv("extra volumes", &format!("{} GB", volumes.join(" GB, ")));
    }
}
