//! Reconciliation driver - import, plan, surface drift, apply with retries

use crate::retry::{ErrorClass, RetryPolicy};
use crate::types::{DesiredConfig, EngineError, PlanSummary, ToolOutput};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Collaborator traits
// ============================================================================

/// The infrastructure tool the driver converges through
///
/// `apply` and `import` report tool-level failure through [`ToolOutput`]
/// rather than `Err`; `Err` is reserved for not being able to run the tool
/// at all.
pub trait ApplyTool {
    fn init(&mut self) -> Result<ToolOutput>;

    /// Write the rendered descriptor where the tool will pick it up
    fn stage(&mut self, descriptor: &str) -> Result<()>;

    fn plan(&mut self) -> Result<PlanSummary>;

    fn apply(&mut self) -> Result<ToolOutput>;

    /// Bring an existing resource under management
    fn import(&mut self, address: &str, id: &str) -> Result<ToolOutput>;

    /// Addresses already under management (empty when no state exists)
    fn managed_addresses(&mut self) -> Result<Vec<String>>;
}

/// Renders a desired config into the tool's descriptor format; pure
pub trait DescriptorRenderer {
    fn render(&self, desired: &DesiredConfig) -> String;
}

/// Cancellable sleeping for retry backoff
pub trait Clock {
    /// Sleep for the full duration; `false` means cancelled mid-sleep
    fn sleep(&self, duration: Duration) -> bool;
}

/// Wall-clock implementation that polls a cancel flag between short slices
pub struct SystemClock {
    cancel: Arc<AtomicBool>,
}

impl SystemClock {
    pub fn new(cancel: Arc<AtomicBool>) -> Self {
        Self { cancel }
    }
}

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(200);
        let mut remaining = duration;
        while remaining > Duration::ZERO {
            if self.cancel.load(Ordering::Relaxed) {
                return false;
            }
            let step = remaining.min(SLICE);
            std::thread::sleep(step);
            remaining -= step;
        }
        !self.cancel.load(Ordering::Relaxed)
    }
}

/// Confirmation callback for operator interaction
pub trait ConfirmCallback {
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(false)
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Where a run got to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveState {
    Init,
    Imported,
    Planned,
    Applying,
    Succeeded,
    Failed,
}

/// An existing resource to bring under management before planning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    /// Tool address, e.g. `oci_core_instance.arm[0]`
    pub address: String,
    /// Provider resource id
    pub id: String,
}

/// What one reconciliation run did
#[derive(Debug)]
pub struct ReconcileReport {
    pub state: DriveState,
    pub attempts: u32,
    /// One entry per backoff actually slept
    pub backoffs: Vec<Duration>,
    /// Addresses adopted via import (or already managed)
    pub adopted: Vec<String>,
    pub plan: PlanSummary,
}

pub struct ReconciliationDriver<'a> {
    tool: &'a mut dyn ApplyTool,
    renderer: &'a dyn DescriptorRenderer,
    clock: &'a dyn Clock,
    confirm: &'a mut dyn ConfirmCallback,
    policy: RetryPolicy,
}

impl<'a> ReconciliationDriver<'a> {
    pub fn new(
        tool: &'a mut dyn ApplyTool,
        renderer: &'a dyn DescriptorRenderer,
        clock: &'a dyn Clock,
        confirm: &'a mut dyn ConfirmCallback,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            tool,
            renderer,
            clock,
            confirm,
            policy,
        }
    }

    /// Converge the account to the desired config
    ///
    /// Strictly sequential: stage, init, import, then a plan/apply loop.
    /// A plan that would destroy or replace an adopted resource is surfaced
    /// through the confirm callback and never applied silently. Zero-diff
    /// plans still go through apply so the descriptor's own check blocks
    /// run. Failed applies are classified; transient failures back off
    /// exponentially (cancellable) up to `max_attempts`, everything else
    /// fails immediately. In-flight tool invocations are never interrupted.
    pub fn run(
        &mut self,
        desired: &DesiredConfig,
        bindings: &[ImportBinding],
    ) -> Result<ReconcileReport, EngineError> {
        let mut report = ReconcileReport {
            state: DriveState::Init,
            attempts: 0,
            backoffs: Vec::new(),
            adopted: Vec::new(),
            plan: PlanSummary::default(),
        };

        self.tool
            .stage(&self.renderer.render(desired))
            .map_err(EngineError::Other)?;

        let out = self.tool.init().map_err(EngineError::Other)?;
        if !out.success {
            report.state = DriveState::Failed;
            return Err(EngineError::ToolFailed {
                op: "init",
                output: out.combined,
            });
        }

        self.import_bindings(bindings, &mut report)?;
        report.state = DriveState::Imported;

        loop {
            report.attempts += 1;

            // re-render and re-plan every attempt; capacity retries can
            // land after the account has moved
            self.tool
                .stage(&self.renderer.render(desired))
                .map_err(EngineError::Other)?;
            let plan = self
                .tool
                .plan()
                .map_err(|err| EngineError::ToolFailed {
                    op: "plan",
                    output: format!("{err:#}"),
                })?;
            log::info!(
                "plan: {} to add, {} to change, {} to destroy",
                plan.add,
                plan.change,
                plan.destroy
            );
            report.plan = plan.clone();
            report.state = DriveState::Planned;

            let adopted = report.adopted.clone();
            self.gate_on_drift(&plan, &adopted, &mut report)?;

            report.state = DriveState::Applying;
            let out = self.tool.apply().map_err(EngineError::Other)?;
            if out.success {
                report.state = DriveState::Succeeded;
                log::info!("apply succeeded on attempt {}", report.attempts);
                return Ok(report);
            }

            match self.policy.classify(&out.combined) {
                ErrorClass::Fatal => {
                    report.state = DriveState::Failed;
                    return Err(EngineError::ToolFailed {
                        op: "apply",
                        output: out.combined,
                    });
                }
                ErrorClass::Retryable { signature } => {
                    let delay = self.policy.delay_for(report.attempts);
                    log::warn!(
                        "apply attempt {}/{} hit \"{signature}\"; backing off {}s",
                        report.attempts,
                        self.policy.max_attempts,
                        delay.as_secs()
                    );
                    report.backoffs.push(delay);
                    if !self.clock.sleep(delay) {
                        report.state = DriveState::Failed;
                        return Err(EngineError::Cancelled);
                    }
                    if report.attempts >= self.policy.max_attempts {
                        report.state = DriveState::Failed;
                        return Err(EngineError::RetriesExhausted {
                            attempts: report.attempts,
                            output: out.combined,
                        });
                    }
                }
            }
        }
    }

    fn import_bindings(
        &mut self,
        bindings: &[ImportBinding],
        report: &mut ReconcileReport,
    ) -> Result<(), EngineError> {
        let managed = self.tool.managed_addresses().map_err(EngineError::Other)?;

        for binding in bindings {
            if managed.contains(&binding.address) {
                log::debug!("{} already managed; skipping import", binding.address);
                report.adopted.push(binding.address.clone());
                continue;
            }

            let out = self
                .tool
                .import(&binding.address, &binding.id)
                .map_err(EngineError::Other)?;
            // a resource imported by a previous interrupted run is fine
            if out.success || out.combined.contains("already managed") {
                log::info!("adopted {} as {}", binding.id, binding.address);
                report.adopted.push(binding.address.clone());
            } else {
                report.state = DriveState::Failed;
                return Err(EngineError::ToolFailed {
                    op: "import",
                    output: out.combined,
                });
            }
        }
        Ok(())
    }

    fn gate_on_drift(
        &mut self,
        plan: &PlanSummary,
        adopted: &[String],
        report: &mut ReconcileReport,
    ) -> Result<(), EngineError> {
        let disturbed: Vec<&String> = plan
            .disturbed_addresses()
            .filter(|addr| adopted.contains(addr))
            .collect();
        if disturbed.is_empty() {
            return Ok(());
        }

        let prompt = format!(
            "Plan would destroy or replace {} adopted resource(s): {}. Continue?",
            disturbed.len(),
            disturbed
                .iter()
                .map(|addr| addr.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        );
        if !self.confirm.confirm(&prompt).map_err(EngineError::Other)? {
            report.state = DriveState::Failed;
            return Err(EngineError::DriftRejected);
        }
        log::warn!("operator approved a plan that disturbs adopted resources");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Scripted tool: apply pops outcomes front-to-back, everything else
    /// is recorded for assertions.
    struct MockTool {
        apply_outcomes: Vec<ToolOutput>,
        managed: Vec<String>,
        imports: Vec<(String, String)>,
        import_outcome: ToolOutput,
        plan: PlanSummary,
        stage_calls: usize,
        apply_calls: usize,
    }

    impl MockTool {
        fn new(apply_outcomes: Vec<ToolOutput>) -> Self {
            Self {
                apply_outcomes,
                managed: Vec::new(),
                imports: Vec::new(),
                import_outcome: ToolOutput::ok(""),
                plan: PlanSummary {
                    add: 1,
                    ..PlanSummary::default()
                },
                stage_calls: 0,
                apply_calls: 0,
            }
        }
    }

    impl ApplyTool for MockTool {
        fn init(&mut self) -> Result<ToolOutput> {
            Ok(ToolOutput::ok("Initialized"))
        }

        fn stage(&mut self, _descriptor: &str) -> Result<()> {
            self.stage_calls += 1;
            Ok(())
        }

        fn plan(&mut self) -> Result<PlanSummary> {
            Ok(self.plan.clone())
        }

        fn apply(&mut self) -> Result<ToolOutput> {
            self.apply_calls += 1;
            Ok(self.apply_outcomes.remove(0))
        }

        fn import(&mut self, address: &str, id: &str) -> Result<ToolOutput> {
            self.imports.push((address.to_string(), id.to_string()));
            Ok(self.import_outcome.clone())
        }

        fn managed_addresses(&mut self) -> Result<Vec<String>> {
            Ok(self.managed.clone())
        }
    }

    struct NullRenderer;

    impl DescriptorRenderer for NullRenderer {
        fn render(&self, desired: &DesiredConfig) -> String {
            desired.signature()
        }
    }

    /// Clock that records requested sleeps and optionally cancels
    struct MockClock {
        slept: Rc<RefCell<Vec<Duration>>>,
        cancel_after: Option<usize>,
    }

    impl Clock for MockClock {
        fn sleep(&self, duration: Duration) -> bool {
            self.slept.borrow_mut().push(duration);
            match self.cancel_after {
                Some(n) => self.slept.borrow().len() < n,
                None => true,
            }
        }
    }

    fn desired() -> DesiredConfig {
        DesiredConfig {
            region: "us-west1".into(),
            groups: vec![],
            block_volume_gb: vec![],
        }
    }

    fn small_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2,
            retryable_signatures: vec!["out of capacity".into()],
        }
    }

    fn run_driver(
        tool: &mut MockTool,
        clock: &MockClock,
        confirm: &mut dyn ConfirmCallback,
        policy: RetryPolicy,
        bindings: &[ImportBinding],
    ) -> Result<ReconcileReport, EngineError> {
        let mut driver = ReconciliationDriver::new(tool, &NullRenderer, clock, confirm, policy);
        driver.run(&desired(), bindings)
    }

    fn quiet_clock() -> MockClock {
        MockClock {
            slept: Rc::new(RefCell::new(Vec::new())),
            cancel_after: None,
        }
    }

    #[test]
    fn test_first_try_success() {
        let mut tool = MockTool::new(vec![ToolOutput::ok("Apply complete!")]);
        let clock = quiet_clock();
        let report =
            run_driver(&mut tool, &clock, &mut AutoConfirm, small_policy(), &[]).unwrap();

        assert_eq!(report.state, DriveState::Succeeded);
        assert_eq!(report.attempts, 1);
        assert!(report.backoffs.is_empty());
    }

    #[test]
    fn test_two_transient_failures_then_success() {
        let mut tool = MockTool::new(vec![
            ToolOutput::failed("Error: Out of capacity in AD-1"),
            ToolOutput::failed("Error: Out of capacity in AD-1"),
            ToolOutput::ok("Apply complete!"),
        ]);
        let clock = quiet_clock();
        let report =
            run_driver(&mut tool, &clock, &mut AutoConfirm, small_policy(), &[]).unwrap();

        assert_eq!(report.state, DriveState::Succeeded);
        assert_eq!(report.attempts, 3);
        // exactly two backoffs recorded, one per failure
        assert_eq!(
            report.backoffs,
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
        assert_eq!(*clock.slept.borrow(), report.backoffs);
        // staged once for init plus once per attempt
        assert_eq!(tool.stage_calls, 4);
    }

    #[test]
    fn test_retries_exhausted_after_bounded_delays() {
        let mut tool = MockTool::new(vec![
            ToolOutput::failed("out of capacity"),
            ToolOutput::failed("out of capacity"),
            ToolOutput::failed("out of capacity"),
        ]);
        let clock = quiet_clock();
        let err = run_driver(&mut tool, &clock, &mut AutoConfirm, small_policy(), &[])
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::RetriesExhausted { attempts: 3, .. }
        ));
        assert_eq!(
            *clock.slept.borrow(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert_eq!(tool.apply_calls, 3);
    }

    #[test]
    fn test_fatal_failure_stops_immediately() {
        let mut tool = MockTool::new(vec![ToolOutput::failed("Error: invalid credentials")]);
        let clock = quiet_clock();
        let err = run_driver(&mut tool, &clock, &mut AutoConfirm, small_policy(), &[])
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::ToolFailed { op: "apply", .. }
        ));
        assert!(clock.slept.borrow().is_empty());
    }

    #[test]
    fn test_cancellation_during_backoff() {
        let mut tool = MockTool::new(vec![
            ToolOutput::failed("out of capacity"),
            ToolOutput::ok("never reached"),
        ]);
        let clock = MockClock {
            slept: Rc::new(RefCell::new(Vec::new())),
            cancel_after: Some(1),
        };
        let err = run_driver(&mut tool, &clock, &mut AutoConfirm, small_policy(), &[])
            .unwrap_err();

        assert!(matches!(err, EngineError::Cancelled));
        // the in-flight apply completed; only the backoff was abandoned
        assert_eq!(tool.apply_calls, 1);
    }

    #[test]
    fn test_import_skips_already_managed() {
        let mut tool = MockTool::new(vec![ToolOutput::ok("Apply complete!")]);
        tool.managed = vec!["oci_core_instance.arm[0]".into()];
        let bindings = vec![
            ImportBinding {
                address: "oci_core_instance.arm[0]".into(),
                id: "ocid1".into(),
            },
            ImportBinding {
                address: "oci_core_instance.arm[1]".into(),
                id: "ocid2".into(),
            },
        ];
        let clock = quiet_clock();
        let report = run_driver(
            &mut tool,
            &clock,
            &mut AutoConfirm,
            small_policy(),
            &bindings,
        )
        .unwrap();

        // only the unmanaged address was imported, both count as adopted
        assert_eq!(tool.imports.len(), 1);
        assert_eq!(tool.imports[0].0, "oci_core_instance.arm[1]");
        assert_eq!(report.adopted.len(), 2);
    }

    #[test]
    fn test_import_already_managed_output_is_adoption() {
        let mut tool = MockTool::new(vec![ToolOutput::ok("Apply complete!")]);
        tool.import_outcome =
            ToolOutput::failed("Error: resource already managed by this configuration");
        let bindings = vec![ImportBinding {
            address: "oci_core_vcn.vcn".into(),
            id: "ocid-vcn".into(),
        }];
        let clock = quiet_clock();
        let report = run_driver(
            &mut tool,
            &clock,
            &mut AutoConfirm,
            small_policy(),
            &bindings,
        )
        .unwrap();

        assert_eq!(report.adopted, vec!["oci_core_vcn.vcn".to_string()]);
    }

    #[test]
    fn test_import_failure_is_fatal() {
        let mut tool = MockTool::new(vec![]);
        tool.import_outcome = ToolOutput::failed("Error: resource not found");
        let bindings = vec![ImportBinding {
            address: "oci_core_vcn.vcn".into(),
            id: "ocid-vcn".into(),
        }];
        let clock = quiet_clock();
        let err = run_driver(
            &mut tool,
            &clock,
            &mut AutoConfirm,
            small_policy(),
            &bindings,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            EngineError::ToolFailed { op: "import", .. }
        ));
    }

    #[test]
    fn test_zero_diff_plan_still_applies() {
        let mut tool = MockTool::new(vec![ToolOutput::ok("No changes.")]);
        tool.plan = PlanSummary::default();
        let clock = quiet_clock();
        let report =
            run_driver(&mut tool, &clock, &mut AutoConfirm, small_policy(), &[]).unwrap();

        assert_eq!(report.state, DriveState::Succeeded);
        assert_eq!(tool.apply_calls, 1);
    }

    #[test]
    fn test_drift_declined_fails_the_run() {
        let mut tool = MockTool::new(vec![]);
        tool.managed = vec!["oci_core_instance.arm[0]".into()];
        tool.plan = PlanSummary {
            add: 1,
            change: 0,
            destroy: 1,
            destroyed_addresses: vec!["oci_core_instance.arm[0]".into()],
            replaced_addresses: vec![],
        };
        let bindings = vec![ImportBinding {
            address: "oci_core_instance.arm[0]".into(),
            id: "ocid1".into(),
        }];
        let clock = quiet_clock();
        let err = run_driver(
            &mut tool,
            &clock,
            &mut AutoDecline,
            small_policy(),
            &bindings,
        )
        .unwrap_err();

        assert!(matches!(err, EngineError::DriftRejected));
        assert_eq!(tool.apply_calls, 0);
    }

    #[test]
    fn test_drift_confirmed_proceeds() {
        let mut tool = MockTool::new(vec![ToolOutput::ok("Apply complete!")]);
        tool.managed = vec!["oci_core_instance.arm[0]".into()];
        tool.plan = PlanSummary {
            add: 0,
            change: 0,
            destroy: 0,
            destroyed_addresses: vec![],
            replaced_addresses: vec!["oci_core_instance.arm[0]".into()],
        };
        let bindings = vec![ImportBinding {
            address: "oci_core_instance.arm[0]".into(),
            id: "ocid1".into(),
        }];
        let clock = quiet_clock();
        let report = run_driver(
            &mut tool,
            &clock,
            &mut AutoConfirm,
            small_policy(),
            &bindings,
        )
        .unwrap();

        assert_eq!(report.state, DriveState::Succeeded);
    }

    #[test]
    fn test_system_clock_cancel_flag() {
        let cancel = Arc::new(AtomicBool::new(true));
        let clock = SystemClock::new(cancel);
        // already cancelled; returns immediately
        assert!(!clock.sleep(Duration::from_secs(60)));

        let clock = SystemClock::new(Arc::new(AtomicBool::new(false)));
        assert!(clock.sleep(Duration::from_millis(10)));
    }
}
