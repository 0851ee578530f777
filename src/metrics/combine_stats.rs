use std::collections::HashMap;

use super::CacheStats;

/// Accumulates [`CacheStats`] received from several instances.
///
/// Averages are kept as `average * count` sums until
/// [`CombineStats::finalize_combined_stats`] divides them back, so the
/// result is the count-weighted mean across sources.
#[derive(Debug, Default)]
pub struct CombineStats {
    combined: HashMap<String, CacheStats>,
}

impl CombineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one source's counters for `operation`; may be called any number of times
    pub fn combine_stats(
        &mut self,
        operation: &str,
        value: CacheStats,
    ) {
        let entry = self.combined.entry(operation.to_string()).or_default();

        entry.hits += value.hits;
        entry.misses += value.misses;
        entry.average_hit_time += value.average_hit_time * value.hits as f64;
        entry.average_miss_time += value.average_miss_time * value.misses as f64;
    }

    pub fn is_empty(&self) -> bool {
        self.combined.is_empty()
    }

    /// Returns the weighted averages and resets the accumulator for reuse
    pub fn finalize_combined_stats(&mut self) -> HashMap<String, CacheStats> {
        let mut finalized = std::mem::take(&mut self.combined);

        for stats in finalized.values_mut() {
            stats.average_hit_time = if stats.hits > 0 {
                stats.average_hit_time / stats.hits as f64
            } else {
                0.0
            };
            stats.average_miss_time = if stats.misses > 0 {
                stats.average_miss_time / stats.misses as f64
            } else {
                0.0
            };
        }

        finalized
    }
}
