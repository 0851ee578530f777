use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Coordination stream settings for one controller
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Name of the stream every instance publishes to and tails
    #[serde(default = "default_stream_id")]
    pub stream_id: String,

    /// Longest a single blocking read waits before the listener loops
    /// and re-checks for shutdown
    #[serde(default = "default_read_block_ms")]
    pub read_block_ms: u64,

    /// Pause after a failed read before the listener tries again
    #[serde(default = "default_read_retry_backoff_ms")]
    pub read_retry_backoff_ms: u64,

    /// How long a stats collection round waits for replies
    #[serde(default = "default_stats_timeout_ms")]
    pub stats_timeout_ms: u64,
}

fn default_stream_id() -> String {
    "d-cache".to_string()
}
fn default_read_block_ms() -> u64 {
    1000
}
fn default_read_retry_backoff_ms() -> u64 {
    500
}
fn default_stats_timeout_ms() -> u64 {
    3000
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            stream_id: default_stream_id(),
            read_block_ms: default_read_block_ms(),
            read_retry_backoff_ms: default_read_retry_backoff_ms(),
            stats_timeout_ms: default_stats_timeout_ms(),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stream_id.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "controller stream_id must not be empty".into(),
            )));
        }

        if self.read_block_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "controller read_block_ms must be greater than 0".into(),
            )));
        }

        Ok(())
    }

    pub fn read_block(&self) -> Duration {
        Duration::from_millis(self.read_block_ms)
    }

    pub fn read_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.read_retry_backoff_ms)
    }

    pub fn stats_timeout(&self) -> Duration {
        Duration::from_millis(self.stats_timeout_ms)
    }
}
