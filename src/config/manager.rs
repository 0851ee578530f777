use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::ConcurrencyControl;
use crate::Error;
use crate::Result;

/// Orchestrator behaviour shared by every wrapped operation
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ManagerConfig {
    /// Publish freshly computed values to other instances
    #[serde(default = "default_broadcast")]
    pub broadcast: bool,

    #[serde(default)]
    pub concurrency: ConcurrencyControl,

    /// Time-to-live of the distributed lock. A crashed executor blocks
    /// other instances for at most this long.
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,

    /// First delay between lock attempts while another instance executes
    #[serde(default = "default_lock_poll_interval_ms")]
    pub lock_poll_interval_ms: u64,

    /// Upper bound for the doubling poll delay
    #[serde(default = "default_lock_poll_max_interval_ms")]
    pub lock_poll_max_interval_ms: u64,
}

fn default_broadcast() -> bool {
    true
}
fn default_lock_ttl_ms() -> u64 {
    30_000
}
fn default_lock_poll_interval_ms() -> u64 {
    5
}
fn default_lock_poll_max_interval_ms() -> u64 {
    100
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            broadcast: default_broadcast(),
            concurrency: ConcurrencyControl::default(),
            lock_ttl_ms: default_lock_ttl_ms(),
            lock_poll_interval_ms: default_lock_poll_interval_ms(),
            lock_poll_max_interval_ms: default_lock_poll_max_interval_ms(),
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lock_ttl_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "manager lock_ttl_ms must be greater than 0".into(),
            )));
        }

        if self.lock_poll_interval_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "manager lock_poll_interval_ms must be greater than 0".into(),
            )));
        }

        if self.lock_poll_interval_ms > self.lock_poll_max_interval_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "manager lock_poll_interval_ms ({}) must not exceed lock_poll_max_interval_ms ({})",
                self.lock_poll_interval_ms, self.lock_poll_max_interval_ms
            ))));
        }

        Ok(())
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }

    pub fn lock_poll_max_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_max_interval_ms)
    }
}
