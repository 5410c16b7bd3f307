//! Persisted desired configuration
//!
//! The last successfully applied config is written per provider under
//! `~/.local/state/cumulo/` and becomes a resolution source on the next
//! run. Loaded once before resolution, written once after a successful
//! apply.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reconcile::DesiredConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PersistedState {
    pub provider: String,
    pub desired: DesiredConfig,
    /// Signature of `desired` at the time it was applied
    pub signature: String,
    pub last_applied: Option<DateTime<Utc>>,
}

impl PersistedState {
    /// Get the state directory path (~/.local/state/cumulo)
    pub fn state_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".local").join("state").join("cumulo"))
    }

    fn state_file(provider: &str) -> Result<PathBuf> {
        Ok(Self::state_dir()?.join(format!("desired-{provider}.toml")))
    }

    /// Load the persisted config for a provider, if any
    pub fn load(provider: &str) -> Result<Option<Self>> {
        Self::load_from(&Self::state_file(provider)?)
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            log::debug!("no persisted config at {}", path.display());
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        let state: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;
        log::debug!("loaded persisted config from {}", path.display());
        Ok(Some(state))
    }

    /// Record a successful apply
    pub fn record_applied(provider: &str, desired: &DesiredConfig) -> Result<()> {
        let state = Self {
            provider: provider.to_string(),
            desired: desired.clone(),
            signature: desired.signature(),
            last_applied: Some(Utc::now()),
        };
        state.save_to(&Self::state_file(provider)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }
        let content =
            toml::to_string_pretty(self).context("Failed to serialize state to TOML")?;
        fs::write(path, &content)
            .with_context(|| format!("Failed to write state file: {}", path.display()))?;
        log::debug!("saved persisted config to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::InstanceGroup;

    fn sample() -> PersistedState {
        PersistedState {
            provider: "oci".into(),
            desired: DesiredConfig {
                region: "eu-stockholm-1".into(),
                groups: vec![InstanceGroup {
                    class: "arm".into(),
                    count: 1,
                    hostnames: vec!["arm-1".into()],
                    ocpus: 4,
                    memory_gb: 24,
                    boot_volume_gb: 47,
                }],
                block_volume_gb: vec![50],
            },
            signature: String::new(),
            last_applied: Some(Utc::now()),
        }
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("desired-oci.toml");

        let mut state = sample();
        state.signature = state.desired.signature();
        state.save_to(&path).unwrap();

        let loaded = PersistedState::load_from(&path).unwrap().unwrap();
        assert_eq!(loaded.desired, state.desired);
        assert_eq!(loaded.signature, state.desired.signature());
        assert_eq!(loaded.provider, "oci");
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = PersistedState::load_from(&dir.path().join("nope.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("desired-oci.toml");
        fs::write(&path, "not = [valid").unwrap();
        assert!(PersistedState::load_from(&path).is_err());
    }
}
