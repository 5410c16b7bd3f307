//! Deploy command - discover, validate and converge the account

use crate::cli::DeployArgs;
use crate::commands;
use crate::state::PersistedState;
use crate::terraform::TerraformCli;
use crate::{config, runner, ui};
use anyhow::Result;
use reconcile::{
    validate, ApplyTool, AutoDecline, ConfirmCallback, EngineError, ReconciliationDriver,
    RetryPolicy, SystemClock,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Asks the operator on the terminal; drift gates default to "no"
struct PromptConfirm;

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        Ok(dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()?)
    }
}

pub fn run(args: &DeployArgs) -> Result<()> {
    let target = &args.target;
    ui::header(&format!("cumulo deploy ({})", target.provider.name()));

    if !runner::command_exists("terraform") {
        return Err(EngineError::Prerequisite("terraform not found on PATH".to_string()).into());
    }

    ui::step(1, 5, "discovering what already exists");
    let discovered = commands::connect_and_discover(target)?;
    ui::headroom_table(&discovered.headroom);

    ui::step(2, 5, "resolving the desired configuration");
    let desired = commands::resolve_desired(target, &discovered, !target.non_interactive)?;
    commands::print_desired(&desired);

    ui::step(3, 5, "validating against the free tier");
    let mut policy = discovered.provider.policy();
    policy.escalate_hard_rejects = target.allow_paid;
    let verdicts = validate(
        &desired,
        &discovered.inventory,
        discovered.provider.quotas(),
        &discovered.headroom,
        &policy,
    );
    commands::gate_verdicts(&verdicts)?;

    ui::step(4, 5, "writing the descriptor");
    let ssh_key = match &args.ssh_public_key {
        Some(value) => config::resolve_ssh_key(value)?,
        None => {
            ui::warn("no --ssh-public-key given; instances will not be reachable over SSH");
            String::new()
        }
    };
    let renderer = discovered.provider.renderer(&ssh_key);
    let dir = match &args.terraform_dir {
        Some(dir) => dir.clone(),
        None => config::default_terraform_dir(discovered.provider.name())?,
    };
    let mut tool = TerraformCli::new(dir, Duration::from_secs(args.apply_timeout));

    if !should_apply(args)? {
        // the descriptor is still worth having for inspection or a later
        // manual apply
        tool.stage(&renderer.render(&desired))?;
        ui::info(&format!(
            "descriptor written to {}; apply skipped",
            tool.dir().join("main.tf").display()
        ));
        return Ok(());
    }

    ui::step(5, 5, "reconciling");
    let bindings = discovered
        .provider
        .import_bindings(&desired, &discovered.inventory);
    if !bindings.is_empty() {
        ui::dim(&format!(
            "{} existing resource(s) will be imported rather than recreated",
            bindings.len()
        ));
    }

    let retry = RetryPolicy {
        max_attempts: args.retry_max_attempts,
        base_delay: Duration::from_secs(args.retry_base_delay),
        ..RetryPolicy::default()
    }
    .with_signatures(discovered.provider.retryable_signatures());

    let clock = SystemClock::new(interrupt_flag());
    let mut confirm: Box<dyn ConfirmCallback> = if target.non_interactive {
        Box::new(AutoDecline)
    } else {
        Box::new(PromptConfirm)
    };

    let mut driver = ReconciliationDriver::new(
        &mut tool,
        renderer.as_ref(),
        &clock,
        confirm.as_mut(),
        retry,
    );
    let report = driver.run(&desired, &bindings)?;

    PersistedState::record_applied(discovered.provider.name(), &desired)?;
    ui::success(&format!(
        "converged in {} attempt(s): {} added, {} changed, {} adopted",
        report.attempts,
        report.plan.add,
        report.plan.change,
        report.adopted.len()
    ));
    Ok(())
}

/// Cancel flag set by Ctrl-C
///
/// The driver only checks it between backoff slices, so an in-flight
/// terraform invocation always runs to completion and the run ends with
/// a clean `Cancelled` instead of a killed child.
fn interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler = Arc::clone(&flag);
    if let Err(err) = ctrlc::set_handler(move || handler.store(true, Ordering::SeqCst)) {
        log::warn!("could not install the interrupt handler: {err}");
    }
    flag
}

fn should_apply(args: &DeployArgs) -> Result<bool> {
    if args.auto_apply {
        return Ok(true);
    }
    if args.target.non_interactive {
        ui::info("non-interactive and --auto-apply not set; staging only");
        return Ok(false);
    }
    Ok(dialoguer::Confirm::new()
        .with_prompt("Apply this configuration?")
        .default(true)
        .interact()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::{
        AutoConfirm, DescriptorRenderer, DesiredConfig, PlanSummary, ToolOutput,
    };

    /// Every apply hits a transient capacity error
    struct CapacityStarvedTool;

    impl ApplyTool for CapacityStarvedTool {
        fn init(&mut self) -> Result<ToolOutput> {
            Ok(ToolOutput::ok(""))
        }

        fn stage(&mut self, _descriptor: &str) -> Result<()> {
            Ok(())
        }

        fn plan(&mut self) -> Result<PlanSummary> {
            Ok(PlanSummary {
                add: 1,
                ..PlanSummary::default()
            })
        }

        fn apply(&mut self) -> Result<ToolOutput> {
            Ok(ToolOutput::failed("Out of host capacity in AD-1"))
        }

        fn import(&mut self, _address: &str, _id: &str) -> Result<ToolOutput> {
            Ok(ToolOutput::ok(""))
        }

        fn managed_addresses(&mut self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    struct EmptyRenderer;

    impl DescriptorRenderer for EmptyRenderer {
        fn render(&self, _desired: &DesiredConfig) -> String {
            String::new()
        }
    }

    #[test]
    fn test_interrupt_flag_cancels_a_backoff() {
        // same wiring as run(): the handler's flag feeds the SystemClock
        let flag = interrupt_flag();
        flag.store(true, Ordering::SeqCst);

        let mut tool = CapacityStarvedTool;
        let clock = SystemClock::new(flag);
        let mut confirm = AutoConfirm;
        let policy = reconcile::RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
            multiplier: 2,
            retryable_signatures: vec!["out of host capacity".into()],
        };

        let mut driver =
            ReconciliationDriver::new(&mut tool, &EmptyRenderer, &clock, &mut confirm, policy);
        let desired = DesiredConfig {
            region: "eu-stockholm-1".into(),
            groups: vec![],
            block_volume_gb: vec![],
        };

        let err = driver.run(&desired, &[]).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }
}
