//! Keeper configuration, read from a TOML file

use alloy_primitives::Address;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;
use trovekit::{Context, ContractAddresses, PopulateConfig};

/// Overrides [`DEFAULT_CONFIG_PATH`]
pub const CONFIG_PATH_ENV: &str = "TROVEKIT_KEEPER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "~/.config/trovekit/keeper.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_poll_interval_secs() -> u64 {
    12
}

fn default_scan_depth() -> usize {
    200
}

fn default_max_liquidations_per_batch() -> usize {
    10
}

fn default_receipt_timeout_secs() -> u64 {
    120
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub rpc_url: String,
    pub contracts: ContractAddresses,
    /// Sends liquidations and collects their gas compensation
    pub keeper: Address,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Troves walked from the tail of the sorted list on each pass
    #[serde(default = "default_scan_depth")]
    pub scan_depth: usize,
    #[serde(default = "default_max_liquidations_per_batch")]
    pub max_liquidations_per_batch: usize,
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    #[serde(default)]
    pub populate: PopulateConfig,
}

impl Config {
    /// Load from `$TROVEKIT_KEEPER_CONFIG`, else the default path
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_file(&path)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let path = PathBuf::from(shellexpand::tilde(path).as_ref());
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config: Config =
            toml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("poll_interval_secs must be positive".into()));
        }
        if self.scan_depth == 0 || self.max_liquidations_per_batch == 0 {
            return Err(ConfigError::Invalid(
                "scan_depth and max_liquidations_per_batch must be positive".into(),
            ));
        }
        if self.keeper.is_zero() || self.contracts.trove_manager.is_zero() {
            return Err(ConfigError::Invalid(
                "keeper and contract addresses must be set".into(),
            ));
        }
        Ok(())
    }

    /// Populate context with the keeper as sender
    pub fn context(&self) -> Context {
        Context::new(self.contracts.clone(), self.keeper).with_config(self.populate.clone())
    }
}
