use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration, loaded from a TOML file. Every field has a
/// default so an empty file (or no file) is valid.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ScanflowConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub cascade: CascadeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerConfig {
    /// Workload failures tolerated per phase before the scan goes Errored.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Exponential backoff base between retries, in seconds.
    #[serde(default = "default_base_backoff_secs")]
    pub base_backoff_secs: u64,

    /// Backoff ceiling, in seconds.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CascadeConfig {
    /// Maximum cascade generation. Rules that would push a child past this
    /// depth are skipped; the bound is the termination guarantee for
    /// self-amplifying rule sets. Never unlimited.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff_secs() -> u64 {
    10
}

fn default_max_backoff_secs() -> u64 {
    300
}

fn default_max_depth() -> u32 {
    3
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            max_retries: default_max_retries(),
            base_backoff_secs: default_base_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

impl Default for CascadeConfig {
    fn default() -> Self {
        CascadeConfig {
            max_depth: default_max_depth(),
        }
    }
}

impl ControllerConfig {
    /// Delay before the given retry attempt: base * 2^retries, capped.
    pub fn backoff(&self, retries: u32) -> Duration {
        let exp = retries.min(16);
        let secs = self
            .base_backoff_secs
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_secs);
        Duration::from_secs(secs)
    }
}

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> anyhow::Result<ScanflowConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
    let config: ScanflowConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
    Ok(config)
}
