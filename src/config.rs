// src/config.rs

//! --- Admission Configuration ---
//! Node-level settings of the admission core, loaded from a TOML file:
//! logging, the heavy check queue and an optional rules override used by
//! test networks.

use crate::heavycheck::HeavyCheckConfig;
use crate::rules::Rules;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::instrument;

const MAX_TASKS_LIMIT: usize = 65_536;
const MAX_SEMAPHORE_TIMEOUT_MS: u64 = 10 * 60 * 1000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration from '{path}': {source}")]
    Load {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to save configuration to '{path}': {source}")]
    Save {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Validation failed: {0}")]
    Validation(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. `info` or `dag_admission::heavycheck=debug`.
    pub level: String,
    pub log_file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file_path: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub heavycheck: HeavyCheckConfig,
    /// Replaces the rules of the genesis epoch. Mainnet nodes leave it unset.
    #[serde(default)]
    pub rules: Option<Rules>,
}

impl Config {
    /// Loads the file at `path`, writing the defaults there first if it is missing.
    #[instrument]
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        if !Path::new(path).exists() {
            let default_config = Config::default();
            default_config.save(path)?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(path)
            .context("Failed to read configuration file.")
            .map_err(|source| ConfigError::Load {
                path: path.to_string(),
                source,
            })?;
        let config: Config = toml::from_str(&content)
            .context("Failed to parse TOML from configuration file.")
            .map_err(|source| ConfigError::Load {
                path: path.to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    #[instrument(skip(self))]
    pub fn save(&self, path: &str) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)
            .context("Failed to serialize configuration to TOML.")
            .map_err(|source| ConfigError::Save {
                path: path.to_string(),
                source,
            })?;
        fs::write(path, toml_string)
            .context("Failed to write configuration to file.")
            .map_err(|source| ConfigError::Save {
                path: path.to_string(),
                source,
            })?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let hc = &self.heavycheck;
        if hc.max_tasks == 0 || hc.max_tasks > MAX_TASKS_LIMIT {
            return Err(ConfigError::Validation(format!(
                "heavycheck.max_tasks must be between 1 and {MAX_TASKS_LIMIT}"
            )));
        }
        if hc.buffer_limit.num == 0 || hc.buffer_limit.size == 0 {
            return Err(ConfigError::Validation(
                "heavycheck.buffer_limit must allow at least one item".to_string(),
            ));
        }
        if !(1..=MAX_SEMAPHORE_TIMEOUT_MS).contains(&hc.semaphore_timeout_ms) {
            return Err(ConfigError::Validation(format!(
                "heavycheck.semaphore_timeout_ms must be between 1 and {MAX_SEMAPHORE_TIMEOUT_MS}"
            )));
        }

        if let Some(rules) = &self.rules {
            let gas = &rules.economy.gas;
            if gas.max_event_gas < gas.event_gas {
                return Err(ConfigError::Validation(
                    "rules.economy.gas.max_event_gas is below the base event gas".to_string(),
                ));
            }
            for (name, power) in [
                ("short_gas_power", &rules.economy.short_gas_power),
                ("long_gas_power", &rules.economy.long_gas_power),
            ] {
                if power.alloc_per_sec == 0 {
                    return Err(ConfigError::Validation(format!(
                        "rules.economy.{name}.alloc_per_sec must be positive"
                    )));
                }
            }
            if rules.dag.max_parents == 0 || rules.dag.max_free_parents > rules.dag.max_parents {
                return Err(ConfigError::Validation(
                    "rules.dag parents limits are inconsistent".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Rules the node starts with.
    pub fn genesis_rules(&self) -> Rules {
        self.rules.clone().unwrap_or_default()
    }
}
