//! Configuration management for PeerChain

use crate::consensus::ConsensusSettings;
use crate::error::ChainError;
use crate::miner::{DEFAULT_DIFFICULTY, MAX_DIFFICULTY, SLOW_DIFFICULTY};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ConsensusConfig {
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,
    #[serde(default = "default_peers")]
    pub peers: Vec<String>,
    #[serde(default = "default_announce_timeout")]
    pub announce_timeout_secs: u64,
    #[serde(default)]
    pub cancel_losers: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            peers: default_peers(),
            announce_timeout_secs: default_announce_timeout(),
            cancel_losers: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Empty disables persistence.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
        }
    }
}

fn default_difficulty() -> u32 {
    DEFAULT_DIFFICULTY
}

fn default_peers() -> Vec<String> {
    (3..=7).map(|n| format!("Satoshi{n}")).collect()
}

fn default_announce_timeout() -> u64 {
    300
}

fn default_db_path() -> String {
    "./data/peerchain.db".to_string()
}

fn default_api_port() -> u16 {
    3000
}

impl Config {
    pub fn from_toml_str(config_str: &str) -> Result<Self, ChainError> {
        let config: Config = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ChainError> {
        let consensus = &self.consensus;

        if consensus.difficulty > MAX_DIFFICULTY {
            return Err(ChainError::ConfigError(format!(
                "consensus.difficulty must be at most {}, got {}",
                MAX_DIFFICULTY, consensus.difficulty
            )));
        }
        if consensus.difficulty >= SLOW_DIFFICULTY {
            warn!(
                difficulty = consensus.difficulty,
                "Configured difficulty will make every round very slow"
            );
        }

        if consensus.peers.is_empty() {
            return Err(ChainError::ConfigError(
                "consensus.peers must name at least one peer".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for name in &consensus.peers {
            if !seen.insert(name.as_str()) {
                return Err(ChainError::ConfigError(format!(
                    "consensus.peers lists {} more than once",
                    name
                )));
            }
        }

        if consensus.announce_timeout_secs == 0 {
            return Err(ChainError::ConfigError(
                "consensus.announce_timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn settings(&self) -> ConsensusSettings {
        ConsensusSettings {
            difficulty: self.consensus.difficulty,
            announce_timeout: Duration::from_secs(self.consensus.announce_timeout_secs),
            cancel_losers: self.consensus.cancel_losers,
        }
    }

    pub fn database_path(&self) -> Option<&str> {
        let path = self.database.path.trim();
        (!path.is_empty()).then_some(path)
    }
}

/// Read `config.toml` from the working directory, falling back to defaults when absent.
pub fn load_config() -> Result<Config, ChainError> {
    load_config_from(CONFIG_FILE)
}

pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config, ChainError> {
    let path = path.as_ref();
    if !path.exists() {
        let config = Config::default();
        config.validate()?;
        return Ok(config);
    }
    let config_str = fs::read_to_string(path)?;
    Config::from_toml_str(&config_str)
}
