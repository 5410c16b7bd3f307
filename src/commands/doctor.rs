//! Doctor command - health checks for the surrounding tooling

use crate::cli::TargetArgs;
use crate::state::PersistedState;
use crate::{provider, runner, ui};
use anyhow::Result;
use reconcile::EngineError;
use std::fs;
use std::time::Duration;

pub fn run(args: &TargetArgs) -> Result<()> {
    ui::header(&format!("cumulo doctor ({})", args.provider.name()));
    let mut failures = Vec::new();

    let cli = match args.provider.name() {
        "gcp" => "gcloud",
        _ => "oci",
    };
    check(&mut failures, &format!("{cli} on PATH"), || {
        if runner::command_exists(cli) {
            Ok(())
        } else {
            Err(format!("{cli} not found; install the provider CLI"))
        }
    });

    check(&mut failures, "terraform on PATH", || {
        if runner::command_exists("terraform") {
            Ok(())
        } else {
            Err("terraform not found".to_string())
        }
    });

    check(&mut failures, "provider authentication", || {
        provider::connect(
            args.provider.name(),
            &args.project,
            args.region.as_deref(),
            Duration::from_secs(args.command_timeout),
        )
        .map(|_| ())
        .map_err(|err| format!("{err}"))
    });

    check(&mut failures, "state directory writable", || {
        let dir = PersistedState::state_dir().map_err(|err| format!("{err:#}"))?;
        fs::create_dir_all(&dir).map_err(|err| format!("{}: {err}", dir.display()))?;
        let probe = dir.join(".doctor");
        fs::write(&probe, b"ok").map_err(|err| format!("{}: {err}", dir.display()))?;
        let _ = fs::remove_file(&probe);
        Ok(())
    });

    println!();
    if failures.is_empty() {
        ui::success("all checks passed");
        Ok(())
    } else {
        Err(EngineError::Prerequisite(format!(
            "{} check(s) failed: {}",
            failures.len(),
            failures.join("; ")
        ))
        .into())
    }
}

fn check(failures: &mut Vec<String>, name: &str, probe: impl FnOnce() -> Result<(), String>) {
    match probe() {
        Ok(()) => ui::success(name),
        Err(reason) => {
            ui::error(&format!("{name}: {reason}"));
            failures.push(name.to_string());
        }
    }
}
