//! Configuration management for PoQChain
//!
//! Protocol constants are fixed for every node on the network. Runtime
//! settings (mining cadence, quorum timeout, logging) come from `config.toml`.

use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Target time between blocks in milliseconds.
pub const MINE_RATE: i64 = 1000;
/// Average block quality a block must reach when not every transaction is approved.
pub const AI_NEEDS_REVIEW_THRESHOLD: f64 = 50.0;
/// Quality score at or above which the oracle auto-approves.
pub const AI_AUTO_APPROVE_THRESHOLD: u32 = 85;

pub const GENESIS_TIMESTAMP: i64 = 1;
pub const GENESIS_LAST_HASH: &str = "-----";
pub const GENESIS_HASH: &str = "hash-one";
pub const INITIAL_DIFFICULTY: u32 = 3;

pub const STARTING_BALANCE: f64 = 1000.0;
pub const VALIDATOR_STAKE_AMOUNT: f64 = 100.0;
pub const MINING_REWARD: f64 = 50.0;
pub const REWARD_INPUT_ADDRESS: &str = "*authorized-reward*";

pub const MAX_QUEUE_LENGTH: usize = 3;
pub const INITIAL_REPUTATION: i32 = 100;
pub const MAX_REPUTATION: i32 = 200;
pub const MIN_REPUTATION: i32 = 20;

pub const PRODUCER_SHARE: f64 = 0.85;
pub const VALIDATOR_SHARE: f64 = 0.10;
/// Default account credited with the platform share.
pub const PLATFORM_ADDRESS: &str = "*platform*";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub mining: MiningConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub payments: PaymentConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_network_id")]
    pub network_id: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MiningConfig {
    #[serde(default = "default_mining_enabled")]
    pub enabled: bool,
    #[serde(default = "default_mining_interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsensusConfig {
    #[serde(default = "default_validators_per_transaction")]
    pub validators_per_transaction: usize,
    /// Seconds an assigned transaction may wait for missing votes before the
    /// quality oracle decides it.
    #[serde(default = "default_quorum_timeout")]
    pub quorum_timeout_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorSplit {
    Even,
    ReputationWeighted,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    #[serde(default = "default_validator_split")]
    pub validator_split: ValidatorSplit,
    #[serde(default = "default_platform_address")]
    pub platform_address: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network_id: default_network_id(),
            log_level: default_log_level(),
        }
    }
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            enabled: default_mining_enabled(),
            interval_secs: default_mining_interval(),
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            validators_per_transaction: default_validators_per_transaction(),
            quorum_timeout_secs: default_quorum_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            validator_split: default_validator_split(),
            platform_address: default_platform_address(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.consensus.validators_per_transaction == 0 {
            return Err(ConfigError::Invalid(
                "consensus.validators_per_transaction must be at least 1".to_string(),
            ));
        }
        if self.mining.interval_secs == 0 {
            return Err(ConfigError::Invalid("mining.interval_secs must be at least 1".to_string()));
        }
        if self.consensus.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "consensus.sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load `config.toml` from `path`, using defaults when the file is absent.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let config: Config = if path.exists() {
        let config_str = fs::read_to_string(path)?;
        toml::from_str(&config_str)?
    } else {
        Config::default()
    };

    config.validate()?;
    Ok(config)
}

fn default_network_id() -> String {
    "devnet".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_mining_enabled() -> bool {
    true
}

fn default_mining_interval() -> u64 {
    5
}

fn default_validators_per_transaction() -> usize {
    3
}

fn default_quorum_timeout() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    5
}

fn default_validator_split() -> ValidatorSplit {
    ValidatorSplit::Even
}

fn default_platform_address() -> String {
    PLATFORM_ADDRESS.to_string()
}
