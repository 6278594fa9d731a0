/*!
 * Registry Configuration
 * Serde-backed settings with environment overrides
 */

use super::errors::{SandboxError, SandboxResult};
use super::limits::{DEFAULT_CLEANUP_PERIOD, DEFAULT_NETNS_DIR};
use crate::sandbox::BackendKind;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_NETNS_DIR: &str = "NETSANDBOX_NETNS_DIR";
pub const ENV_CLEANUP_PERIOD_MS: &str = "NETSANDBOX_CLEANUP_PERIOD_MS";
pub const ENV_BACKEND: &str = "NETSANDBOX_BACKEND";

/// Settings for a [`SandboxRegistry`](crate::sandbox::SandboxRegistry)
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RegistryConfig {
    /// Directory used by `generate_key`
    pub netns_dir: PathBuf,
    /// Grace period before an unreferenced namespace is reclaimed
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub cleanup_period: Duration,
    /// Which namespace backend to use
    pub backend: BackendKind,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            netns_dir: PathBuf::from(DEFAULT_NETNS_DIR),
            cleanup_period: DEFAULT_CLEANUP_PERIOD,
            backend: BackendKind::Auto,
        }
    }
}

impl RegistryConfig {
    /// Defaults overridden by `NETSANDBOX_*` environment variables
    pub fn from_env() -> SandboxResult<Self> {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn with_overrides<F>(mut self, lookup: F) -> SandboxResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_NETNS_DIR) {
            self.netns_dir = PathBuf::from(dir);
        }

        if let Some(raw) = lookup(ENV_CLEANUP_PERIOD_MS) {
            let millis: u64 = raw.trim().parse().map_err(|e| {
                SandboxError::InvalidConfig(format!("{}={:?}: {}", ENV_CLEANUP_PERIOD_MS, raw, e))
            })?;
            self.cleanup_period = Duration::from_millis(millis);
        }

        if let Some(raw) = lookup(ENV_BACKEND) {
            self.backend = raw.parse()?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn with_cleanup_period(mut self, period: Duration) -> Self {
        self.cleanup_period = period;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_netns_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.netns_dir = dir.into();
        self
    }

    /// Reject settings the registry cannot run with
    pub fn validate(&self) -> SandboxResult<()> {
        if self.cleanup_period.is_zero() {
            return Err(SandboxError::InvalidConfig(
                "cleanup period must be greater than zero".to_string(),
            ));
        }
        if !self.netns_dir.is_absolute() {
            return Err(SandboxError::InvalidConfig(format!(
                "netns directory {} must be absolute",
                self.netns_dir.display()
            )));
        }
        Ok(())
    }
}
