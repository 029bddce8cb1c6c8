//! Configuration for the witness engine.

use derivation::GraphConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, WitnessError};

/// Configuration for a [`Witness`](crate::Witness) instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WitnessConfig {
    pub ledger: LedgerConfig,
    pub graph: GraphConfig,
    pub crystal: CrystalConfig,
    pub storage: StorageConfig,
}

impl WitnessConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| WitnessError::InvalidInput(format!("config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> std::result::Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.graph.validate()?;
        if self.crystal.max_sources == 0 {
            return Err(WitnessError::InvalidInput(
                "crystal.max_sources must be at least 1".to_string(),
            ));
        }
        if self.crystal.synthesis_timeout_ms == 0 {
            return Err(WitnessError::InvalidInput(
                "crystal.synthesis_timeout_ms must be positive".to_string(),
            ));
        }
        if self.ledger.max_chain_depth == 0 {
            return Err(WitnessError::InvalidInput(
                "ledger.max_chain_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Mark ledger configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Score marks on append when a domain is known
    pub score_on_append: bool,
    /// Domain used when a draft names none
    pub default_domain: Option<String>,
    /// Longest causal chain walked before giving up
    pub max_chain_depth: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            score_on_append: true,
            default_domain: None,
            max_chain_depth: 100_000,
        }
    }
}

/// Crystallization configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrystalConfig {
    /// Upper bound on a single synthesis call (ms)
    pub synthesis_timeout_ms: u64,
    /// Largest window accepted by one run
    pub max_sources: usize,
    /// Link committed crystals to their sources in the derivation graph
    pub link_sources: bool,
}

impl Default for CrystalConfig {
    fn default() -> Self {
        Self {
            synthesis_timeout_ms: 30_000,
            max_sources: 500,
            link_sources: true,
        }
    }
}

impl CrystalConfig {
    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the JSON-lines stores; in-memory when absent
    pub data_dir: Option<PathBuf>,
}
