use eyre::{Result, WrapErr};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::errors::BridgeError;
use crate::executor::ExecutorConfig;

/// Prefix of every environment variable read by [`Config::load`]
pub const ENV_PREFIX: &str = "RELAYER";

/// Main configuration for the relayer core
///
/// Sections map to `RELAYER_<SECTION>__<FIELD>` environment variables, for example
/// `RELAYER_EXECUTOR__MAX_QUORUM_RETRIES_ON_ETHEREUM=5`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub state_machine: StateMachineSettings,
}

/// Executor configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExecutorSettings {
    #[serde(default = "default_max_retries")]
    pub max_quorum_retries_on_ethereum: u64,
    #[serde(default = "default_max_retries")]
    pub max_quorum_retries_on_source: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries_on_was_proposed: u64,
    #[serde(default = "default_time_for_wait_on_ethereum")]
    pub time_for_wait_on_ethereum_ms: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_quorum_retries_on_ethereum: default_max_retries(),
            max_quorum_retries_on_source: default_max_retries(),
            max_retries_on_was_proposed: default_max_retries(),
            time_for_wait_on_ethereum_ms: default_time_for_wait_on_ethereum(),
        }
    }
}

impl ExecutorSettings {
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_quorum_retries_on_ethereum: self.max_quorum_retries_on_ethereum,
            max_quorum_retries_on_source: self.max_quorum_retries_on_source,
            max_retries_on_was_proposed: self.max_retries_on_was_proposed,
            time_for_wait_on_ethereum: Duration::from_millis(self.time_for_wait_on_ethereum_ms),
        }
    }
}

/// State machine cadence
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StateMachineSettings {
    #[serde(default = "default_step_interval")]
    pub ethereum_to_source_step_interval_ms: u64,
    #[serde(default = "default_step_interval")]
    pub source_to_ethereum_step_interval_ms: u64,
}

impl Default for StateMachineSettings {
    fn default() -> Self {
        Self {
            ethereum_to_source_step_interval_ms: default_step_interval(),
            source_to_ethereum_step_interval_ms: default_step_interval(),
        }
    }
}

impl StateMachineSettings {
    pub fn ethereum_to_source_step_interval(&self) -> Duration {
        Duration::from_millis(self.ethereum_to_source_step_interval_ms)
    }

    pub fn source_to_ethereum_step_interval(&self) -> Duration {
        Duration::from_millis(self.source_to_ethereum_step_interval_ms)
    }
}

/// Default functions
fn default_max_retries() -> u64 {
    3
}

fn default_time_for_wait_on_ethereum() -> u64 {
    10_000
}

fn default_step_interval() -> u64 {
    1000
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from `RELAYER_*` environment variables
    fn load_from_env() -> Result<Self> {
        let config: Config = ::config::Config::builder()
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .wrap_err("Failed to read relayer environment")?
            .try_deserialize()
            .wrap_err("Invalid relayer configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.executor.executor_config().validate()?;

        if self.state_machine.ethereum_to_source_step_interval_ms == 0 {
            return Err(BridgeError::InvalidConfig(
                "state_machine.ethereum_to_source_step_interval_ms cannot be zero".to_string(),
            )
            .into());
        }
        if self.state_machine.source_to_ethereum_step_interval_ms == 0 {
            return Err(BridgeError::InvalidConfig(
                "state_machine.source_to_ethereum_step_interval_ms cannot be zero".to_string(),
            )
            .into());
        }

        Ok(())
    }
}
