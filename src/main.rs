mod cli;
mod commands;
mod config;
mod emitter;
mod provider;
mod runner;
mod state;
mod terraform;
mod ui;

use clap::{CommandFactory, Parser};
use cli::{Cli, Command};
use reconcile::EngineError;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Command::Deploy(args) => commands::deploy::run(args),
        Command::Validate(args) => commands::validate::run(args),
        Command::Inventory(args) => commands::inventory::run(args),
        Command::Doctor(args) => commands::doctor::run(args),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "cumulo", &mut std::io::stdout());
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            ui::error(&format!("{err:#}"));
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        log::LevelFilter::Error
    } else {
        match verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .init();
}

/// Map failures onto the documented exit codes: 2 for a validation
/// rejection, 3 for an apply that could not converge, 4 for missing
/// prerequisites or failed authentication, 1 for everything else.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<EngineError>() {
        Some(EngineError::Auth(_) | EngineError::Prerequisite(_)) => 4,
        Some(EngineError::ValidationRejected(_)) => 2,
        Some(EngineError::RetriesExhausted { .. }) => 3,
        Some(EngineError::ToolFailed { op: "apply", .. }) => 3,
        _ => 1,
    }
}
