//! Cache hit/miss statistics.
//!
//! [`CacheStatsTable`] keeps history-capped running averages per operation;
//! [`CombineStats`] merges tables collected from several instances.

mod cache_stats;
mod combine_stats;
mod types;

pub use cache_stats::*;
pub use combine_stats::*;
pub use types::*;
