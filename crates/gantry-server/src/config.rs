//! Server configuration
//!
//! Loaded from a YAML file layered with `GANTRY_`-prefixed environment variables
//! (`__` separates nested keys, e.g. `GANTRY_LOCKER__ADDRESS`) and command line
//! overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use serde_json::Value;

use gantry_common::ConfigError;

use crate::logging::LogConfig;
use crate::orchestrator::OwnershipConfig;

pub const DEFAULT_CONFIG_PATH: &str = "conf/gantry.yml";
const DEFAULT_LOCK_PREFIX: &str = "gantry/targets";
const DEFAULT_SERVICE_NAME: &str = "gantry-collector";
const DEFAULT_SERVICE_TTL: Duration = Duration::from_secs(5);

/// Command line arguments for the server
#[derive(Debug, Parser)]
#[command(name = "gantry-server", version, about = "Coordinates target ownership across collector instances")]
pub struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config", env = "GANTRY_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// Overrides `instance-name`
    #[arg(long = "instance-name")]
    pub instance_name: Option<String>,
    /// Overrides `log.level`
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AppConfig {
    /// Identity written into held locks; defaults to the hostname
    #[serde(alias = "instance_name")]
    pub instance_name: String,
    pub log: LogConfig,
    /// Locker backend section, selected by its `type`
    pub locker: Value,
    /// Target loader backend section, selected by its `type`
    pub loader: Value,
    #[serde(alias = "lock_prefix")]
    pub lock_prefix: String,
    #[serde(alias = "service_name")]
    pub service_name: String,
    #[serde(alias = "service_address")]
    pub service_address: String,
    #[serde(alias = "service_port")]
    pub service_port: u16,
    #[serde(alias = "service_ttl", with = "gantry_common::duration")]
    pub service_ttl: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            instance_name: String::new(),
            log: LogConfig::default(),
            locker: Value::Null,
            loader: Value::Null,
            lock_prefix: DEFAULT_LOCK_PREFIX.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_address: String::new(),
            service_port: 0,
            service_ttl: DEFAULT_SERVICE_TTL,
        }
    }
}

impl AppConfig {
    /// Load the file named on the command line, the environment and the CLI overrides
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut builder = Self::builder(&cli.config);
        if let Some(name) = &cli.instance_name {
            builder = builder.set_override("instance-name", name.as_str())?;
        }
        if let Some(level) = &cli.log_level {
            builder = builder.set_override("log.level", level.as_str())?;
        }
        Self::build(builder, &cli.config)
    }

    /// Load a configuration file layered with the environment
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        Self::build(Self::builder(path), path)
    }

    /// The default path may be absent; an explicitly named file must exist
    fn builder(path: &Path) -> ConfigBuilder<DefaultState> {
        let required = path != Path::new(DEFAULT_CONFIG_PATH);
        Config::builder()
            .add_source(File::from(path).required(required))
            .add_source(
                Environment::with_prefix("GANTRY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
    }

    fn build(builder: ConfigBuilder<DefaultState>, path: &Path) -> anyhow::Result<Self> {
        let mut config: AppConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;

        if config.instance_name.trim().is_empty() {
            config.instance_name = hostname::get()
                .context("failed to read hostname")?
                .to_string_lossy()
                .into_owned();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instance_name.trim().is_empty() {
            return Err(ConfigError::Missing("instance-name"));
        }
        if !self.locker.is_object() {
            return Err(ConfigError::Missing("locker"));
        }
        if !self.loader.is_object() {
            return Err(ConfigError::Missing("loader"));
        }
        if self.lock_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::Missing("lock-prefix"));
        }
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::Missing("service-name"));
        }
        if self.service_ttl.is_zero() {
            return Err(ConfigError::Invalid(
                "service-ttl must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// How this instance claims and advertises targets
    pub fn ownership(&self) -> OwnershipConfig {
        OwnershipConfig {
            instance_name: self.instance_name.clone(),
            lock_prefix: self.lock_prefix.trim_end_matches('/').to_string(),
            service_name: self.service_name.clone(),
            service_address: self.service_address.clone(),
            service_port: self.service_port,
            service_ttl: self.service_ttl,
        }
    }
}
