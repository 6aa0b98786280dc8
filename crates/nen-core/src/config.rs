//! Configuration management for nen.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that points at an explicit config file
pub const CONFIG_ENV: &str = "NEN_CONFIG";

const CONFIG_FILE: &str = "nen.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Capacity of the default allocation strategy
    #[serde(default = "default_max_live_flows")]
    pub max_live_flows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Flows with more steps than this fail instead of running
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// EnvFilter directive, e.g. "nen=debug"
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_max_live_flows() -> usize {
    4096
}

fn default_max_steps() -> usize {
    64
}

fn default_filter() -> String {
    "warn".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_live_flows: default_max_live_flows(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

impl Config {
    /// Load configuration from $NEN_CONFIG or the nearest nen.toml
    pub fn load() -> Result<Self> {
        Self::load_from(Self::find_config_path()?)
    }

    /// Try to load configuration, returning None if not found or invalid
    pub fn try_load() -> Option<Self> {
        match Self::load() {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::debug!("No usable nen.toml, using defaults: {:#}", e);
                None
            }
        }
    }

    /// Built-in defaults used when no nen.toml is present
    pub fn default_minimal() -> Self {
        Self::default()
    }

    /// Load configuration from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse {}", path.as_ref().display()))
    }

    /// Parse and validate a TOML document
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Find the config file: $NEN_CONFIG first, then nen.toml in the
    /// current directory or its parents
    pub fn find_config_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(path);
            }
            anyhow::bail!("{} points at missing file {}", CONFIG_ENV, path.display());
        }

        let mut current = std::env::current_dir()?;

        for _ in 0..10 {
            let candidate = current.join(CONFIG_FILE);
            if candidate.exists() {
                return Ok(candidate);
            }
            if !current.pop() {
                break;
            }
        }

        anyhow::bail!("{} not found in current directory or parents", CONFIG_FILE)
    }

    /// Serialize the effective configuration
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    fn validate(&self) -> Result<()> {
        if self.registry.max_live_flows == 0 {
            anyhow::bail!("registry.max_live_flows must be greater than zero");
        }
        if self.executor.max_steps == 0 {
            anyhow::bail!("executor.max_steps must be greater than zero");
        }
        Ok(())
    }
}
