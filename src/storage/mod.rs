//! Cache content storage contract.
//!
//! Any failure returned here is advisory: the orchestrator treats a failed
//! `get` as a miss and only logs failed writes.

mod lru_in_memory;

pub use lru_in_memory::*;

#[cfg(test)]
mod lru_in_memory_test;

use std::time::Duration;

#[cfg(test)]
use mockall::automock;

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CacheStorage: Send + Sync + 'static {
    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<Value>>;

    /// Stores `value` under `key` for `ttl`; `Duration::ZERO` keeps it until
    /// evicted.
    async fn set(
        &self,
        key: &str,
        ttl: Duration,
        value: Value,
    ) -> Result<()>;

    async fn evict(
        &self,
        key: &str,
    ) -> Result<()>;
}
