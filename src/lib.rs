//! Distributed cache coordination.
//!
//! Wraps expensive async operations with a cache-aside layer and keeps a
//! fleet of instances consistent over one shared append-only stream:
//! evictions and freshly computed values are propagated to every instance,
//! and concurrent misses for the same key collapse into a single execution,
//! either within the process or across instances behind a distributed lock.
//!
//! The building blocks, bottom-up:
//!
//! - [`OperationRegistry`]: in-process single-flight table.
//! - [`CacheStatsTable`] / [`CombineStats`]: hit/miss accounting.
//! - [`StreamTransport`] / [`LockStore`]: the coordination substrate, with
//!   [`MemoryStream`] as an in-process implementation.
//! - [`CacheStorage`]: key/value backend, with [`LruInMemoryStorage`].
//! - [`StreamCacheController`]: the coordination protocol.
//! - [`GenericManager`]: the orchestrator handing out [`CachedOperation`]s.

mod config;
pub(crate) mod constants;
mod controller;
mod errors;
mod keys;
mod management;
mod metrics;
mod race;
mod storage;
mod transport;
pub(crate) mod utils;

pub use config::*;
pub use controller::*;
pub use errors::*;
pub use keys::*;
pub use management::*;
pub use metrics::*;
pub use race::*;
pub use storage::*;
pub use transport::*;

#[cfg(test)]
mod errors_test;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
