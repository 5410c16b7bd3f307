//! Terraform adapter - the engine's apply tool over the `terraform` binary

use crate::runner::run_combined;
use anyhow::{Context, Result};
use reconcile::{ApplyTool, PlanSummary, ToolOutput};
use regex::Regex;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub struct TerraformCli {
    dir: PathBuf,
    /// Per-invocation deadline; applies can legitimately take minutes
    apply_timeout: Duration,
}

impl TerraformCli {
    pub fn new(dir: PathBuf, apply_timeout: Duration) -> Self {
        Self { dir, apply_timeout }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn terraform(&self, args: &[&str], timeout: Duration) -> Result<ToolOutput> {
        log::debug!("terraform {} in {}", args.join(" "), self.dir.display());
        run_combined("terraform", args, Some(&self.dir), timeout)
    }
}

impl ApplyTool for TerraformCli {
    fn init(&mut self) -> Result<ToolOutput> {
        self.terraform(&["init", "-input=false", "-no-color"], self.apply_timeout)
    }

    fn stage(&mut self, descriptor: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.dir.join("main.tf");
        fs::write(&path, descriptor)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        log::debug!("staged descriptor at {}", path.display());
        Ok(())
    }

    fn plan(&mut self) -> Result<PlanSummary> {
        let out = self.terraform(&["plan", "-input=false", "-no-color"], self.apply_timeout)?;
        if !out.success {
            anyhow::bail!("{}", out.combined);
        }
        Ok(parse_plan(&out.combined))
    }

    fn apply(&mut self) -> Result<ToolOutput> {
        self.terraform(
            &["apply", "-auto-approve", "-input=false", "-no-color"],
            self.apply_timeout,
        )
    }

    fn import(&mut self, address: &str, id: &str) -> Result<ToolOutput> {
        self.terraform(
            &["import", "-input=false", "-no-color", address, id],
            self.apply_timeout,
        )
    }

    fn managed_addresses(&mut self) -> Result<Vec<String>> {
        // state list fails when no state exists yet; that just means
        // nothing is managed
        match self.terraform(&["state", "list", "-no-color"], self.apply_timeout) {
            Ok(out) if out.success => Ok(out
                .combined
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect()),
            Ok(_) | Err(_) => Ok(Vec::new()),
        }
    }
}

/// Parse `terraform plan -no-color` output into a summary
fn parse_plan(output: &str) -> PlanSummary {
    let mut summary = PlanSummary::default();

    if output.contains("No changes.") {
        return summary;
    }

    // the -no-color regexes are stable across terraform 1.x
    if let Ok(re) = Regex::new(r"Plan: (\d+) to add, (\d+) to change, (\d+) to destroy") {
        if let Some(caps) = re.captures(output) {
            summary.add = caps[1].parse().unwrap_or(0);
            summary.change = caps[2].parse().unwrap_or(0);
            summary.destroy = caps[3].parse().unwrap_or(0);
        }
    }

    if let Ok(re) = Regex::new(r"# (\S+) will be destroyed") {
        for caps in re.captures_iter(output) {
            summary.destroyed_addresses.push(caps[1].to_string());
        }
    }
    if let Ok(re) = Regex::new(r"# (\S+) must be replaced") {
        for caps in re.captures_iter(output) {
            summary.replaced_addresses.push(caps[1].to_string());
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN_OUTPUT: &str = r#"
Terraform used the selected providers to generate the following execution plan.

  # oci_core_instance.arm[0] must be replaced
-/+ resource "oci_core_instance" "arm" {
    }

  # oci_core_volume.extra[0] will be destroyed
  - resource "oci_core_volume" "extra" {
    }

Plan: 2 to add, 1 to change, 2 to destroy.
"#;

    #[test]
    fn test_parse_plan_counts_and_addresses() {
        let summary = parse_plan(PLAN_OUTPUT);
        assert_eq!(summary.add, 2);
        assert_eq!(summary.change, 1);
        assert_eq!(summary.destroy, 2);
        assert_eq!(summary.destroyed_addresses, vec!["oci_core_volume.extra[0]"]);
        assert_eq!(summary.replaced_addresses, vec!["oci_core_instance.arm[0]"]);
    }

    #[test]
    fn test_parse_plan_no_changes() {
        let summary =
            parse_plan("No changes. Your infrastructure matches the configuration.");
        assert!(summary.is_noop());
        assert!(summary.destroyed_addresses.is_empty());
    }

    #[test]
    fn test_parse_plan_garbage_is_noop() {
        assert!(parse_plan("something unexpected").is_noop());
    }

    #[test]
    fn test_stage_writes_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let mut tf = TerraformCli::new(dir.path().join("tf"), Duration::from_secs(1));
        tf.stage("resource \"x\" \"y\" {}").unwrap();
        let written = fs::read_to_string(dir.path().join("tf/main.tf")).unwrap();
        assert!(written.contains("resource"));
    }
}
