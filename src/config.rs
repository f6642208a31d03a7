use serde::Deserialize;
use std::path::Path;

/// Top-level config loaded from `net_reduction.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { db_path: default_db_path() }
    }
}

fn default_db_path() -> String {
    "./net_reduction.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryConfig {
    /// Interval between unsolicited sweeper recomputes of every client's
    /// summaries, independent of the per-write recompute (§4.7: "runs on
    /// every write ... and on explicit refresh requests").
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self { sweep_interval_secs: default_sweep_interval() }
    }
}

fn default_sweep_interval() -> u64 {
    900
}

impl EngineConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&contents)?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }
}
