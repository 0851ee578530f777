use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_MAX_HISTORY;
use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct StatsConfig {
    /// Ceiling on the sample count used when folding a new timing into a
    /// running average. Keeps recent samples significant in long-lived
    /// processes.
    #[serde(default = "default_max_history")]
    pub max_history: u64,
}

fn default_max_history() -> u64 {
    DEFAULT_MAX_HISTORY
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
        }
    }
}

impl StatsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_history == 0 {
            return Err(Error::Config(ConfigError::Message(
                "stats max_history must be greater than 0".into(),
            )));
        }
        Ok(())
    }
}
