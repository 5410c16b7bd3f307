//! Inventory command - show everything that currently exists

use crate::cli::TargetArgs;
use crate::commands;
use crate::ui;
use anyhow::Result;

pub fn run(args: &TargetArgs) -> Result<()> {
    ui::header(&format!("cumulo inventory ({})", args.provider.name()));

    let discovered = commands::connect_and_discover(args)?;
    ui::inventory_dashboard(&discovered.inventory);
    ui::headroom_table(&discovered.headroom);
    Ok(())
}
