//! Cache-aside orchestration of expensive operations.
//!
//! [`GenericManager::wrap`] turns an async function into a
//! [`CachedOperation`] that consults storage first and, on a miss, executes
//! under the configured [`ConcurrencyControl`].

mod generic_manager;

pub use generic_manager::*;


use serde::Deserialize;
use serde::Serialize;

/// Duplicate-execution suppression strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyControl {
    /// Every caller that misses executes
    None,
    /// One execution per key within this process
    #[default]
    Local,
    /// One execution per key across every instance sharing the stream
    Distributed,
}
