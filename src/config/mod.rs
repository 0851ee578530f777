//! Configuration for the cache coordination layer.
//!
//! Sources are merged in this order, later ones winning:
//! 1. Type defaults
//! 2. The file named by the `CONFIG_PATH` environment variable (if set)
//! 3. Environment variables with the `DCACHE__` prefix, e.g.
//!    `DCACHE__MANAGER__CONCURRENCY=distributed`
mod controller;
mod manager;
mod stats;

pub use controller::*;
pub use manager::*;
pub use stats::*;


use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "DCACHE";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CacheConfig {
    /// Coordination stream and listener settings
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Concurrency strategy and distributed lock tuning
    #[serde(default)]
    pub manager: ManagerConfig,
    /// Statistics history window
    #[serde(default)]
    pub stats: StatsConfig,
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}

impl CacheConfig {
    /// Loads defaults, `CONFIG_PATH` and environment overrides.
    ///
    /// Does not validate, so further overrides can still be layered with
    /// [`CacheConfig::with_override_config`]. Call [`CacheConfig::validate`]
    /// once all sources are applied.
    ///
    /// ```ignore
    /// let cfg = CacheConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        let config: Self = builder.add_source(environment()).build()?.try_deserialize()?;
        Ok(config)
    }

    /// Layers `path` over the current values, then the environment again.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn validate(self) -> Result<Self> {
        self.controller.validate()?;
        self.manager.validate()?;
        self.stats.validate()?;
        Ok(self)
    }
}
