//! Validate command - judge a desired config without touching anything

use crate::cli::TargetArgs;
use crate::commands;
use crate::ui;
use anyhow::Result;
use reconcile::validate;

pub fn run(args: &TargetArgs) -> Result<()> {
    ui::header(&format!("cumulo validate ({})", args.provider.name()));

    let discovered = commands::connect_and_discover(args)?;
    ui::headroom_table(&discovered.headroom);

    let desired = commands::resolve_desired(args, &discovered, false)?;
    commands::print_desired(&desired);

    let mut policy = discovered.provider.policy();
    policy.escalate_hard_rejects = args.allow_paid;
    let verdicts = validate(
        &desired,
        &discovered.inventory,
        discovered.provider.quotas(),
        &discovered.headroom,
        &policy,
    );
    commands::gate_verdicts(&verdicts)?;

    ui::success("configuration fits inside the free tier");
    Ok(())
}
