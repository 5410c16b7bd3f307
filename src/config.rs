//! Operator-supplied configuration: explicit config files and SSH keys

use anyhow::{Context, Result};
use reconcile::DesiredConfig;
use std::fs;
use std::path::{Path, PathBuf};

/// Load an explicit desired config from a TOML file
pub fn load_desired_config(path: &Path) -> Result<DesiredConfig> {
    let expanded = shellexpand::tilde(&path.to_string_lossy().into_owned()).into_owned();
    let content = fs::read_to_string(&expanded)
        .with_context(|| format!("Could not read config file: {expanded}"))?;
    let config: DesiredConfig =
        toml::from_str(&content).with_context(|| format!("Invalid config file: {expanded}"))?;
    Ok(config)
}

/// Resolve an SSH public key argument
///
/// `@path` reads the key from a file (tilde-expanded); anything else is
/// taken as the literal key material.
pub fn resolve_ssh_key(value: &str) -> Result<String> {
    if let Some(path) = value.strip_prefix('@') {
        let expanded = shellexpand::tilde(path).into_owned();
        let key = fs::read_to_string(&expanded)
            .with_context(|| format!("Could not read SSH public key: {expanded}"))?;
        Ok(key.trim().to_string())
    } else {
        Ok(value.trim().to_string())
    }
}

/// Default Terraform working directory for a provider
pub fn default_terraform_dir(provider: &str) -> Result<PathBuf> {
    Ok(crate::state::PersistedState::state_dir()?
        .join("terraform")
        .join(provider))
}
