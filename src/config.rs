//! TOML configuration for the offload library and the `fvrepo` CLI.
//!
//! Layered the usual way: an explicit path, then the `FVREPO_CONFIG`
//! environment variable, then `/etc/fvrepo/fvrepo.toml`, then compiled-in
//! defaults. Every section is optional.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::batch::{REPO_ADD_BATCH_MAX, SEARCH_BATCH_MAX};
use crate::protocol::QUERY_COUNT_MAX;
use crate::runtime::RunMode;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "FVREPO_CONFIG";

/// Standard system location of the config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/fvrepo/fvrepo.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OffloadConfig {
    #[serde(default)]
    pub kernels: KernelConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl OffloadConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded offload configuration");
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Try `FVREPO_CONFIG`, then the system path, then defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "FVREPO_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Reject settings the protocol cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batching.repo_add_max == 0 {
            anyhow::bail!("batching.repo_add_max must be greater than 0");
        }
        if self.batching.search_max == 0 {
            anyhow::bail!("batching.search_max must be greater than 0");
        }
        if self.batching.query_count_max == 0 {
            anyhow::bail!("batching.query_count_max must be greater than 0");
        }
        if self.kernels.library.is_empty() {
            anyhow::bail!("kernels.library must not be empty");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Kernels
// ---------------------------------------------------------------------------

/// Kernel library and symbol names on the co-processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Shared object holding the retrieval kernels.
    pub library: String,
    pub init: String,
    pub release: String,
    pub repo_add: String,
    pub repo_del: String,
    pub accurate_del_or_modify: String,
    pub search: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            library: "libretr_kernels.so".to_string(),
            init: "RetrInitializeKernel".to_string(),
            release: "RetrReleaseKernel".to_string(),
            repo_add: "RetrRepoAddKernel".to_string(),
            repo_del: "RetrRepoDelKernel".to_string(),
            accurate_del_or_modify: "RetrRepoAccurateDelOrModifyKernel".to_string(),
            search: "RetrSearchKernel".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Batching
// ---------------------------------------------------------------------------

/// Hardware-imposed batch limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Maximum features per N:M repository-add invocation.
    pub repo_add_max: u64,
    /// Maximum queries per N:M search invocation.
    pub search_max: u64,
    /// Maximum queries in one search call.
    pub query_count_max: u32,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            repo_add_max: REPO_ADD_BATCH_MAX,
            search_max: SEARCH_BATCH_MAX,
            query_count_max: QUERY_COUNT_MAX,
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Settings for the in-process simulated device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Whether the simulated process is host-resident or device-resident.
    pub run_mode: RunMode,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self { run_mode: RunMode::Host }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset (`trace`..`error`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
