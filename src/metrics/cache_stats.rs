use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use super::CacheMetrics;
use super::CacheStats;
use crate::constants::DEFAULT_MAX_HISTORY;
use crate::utils::time::duration_as_ms;
use crate::StatsConfig;

/// Per-operation hit/miss accounting owned by the hosting process.
///
/// One table is created at startup and shared by handle between the
/// orchestrator, the single-flight registries and the coordinator, so tests
/// can run isolated instances side by side.
#[derive(Debug)]
pub struct CacheStatsTable {
    max_history: u64,
    operations: Mutex<HashMap<String, CacheStats>>,
}

impl Default for CacheStatsTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl CacheStatsTable {
    pub fn new(max_history: u64) -> Self {
        Self {
            max_history: max_history.max(1),
            operations: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &StatsConfig) -> Self {
        Self::new(config.max_history)
    }

    pub fn max_history(&self) -> u64 {
        self.max_history
    }

    /// Records a cache hit that took `elapsed_ms` milliseconds
    pub fn hit(
        &self,
        operation: &str,
        elapsed_ms: f64,
    ) {
        let mut operations = self.operations.lock();
        let stats = operations.entry(operation.to_string()).or_default();

        let count = stats.hits.min(self.max_history);
        stats.average_hit_time = fold_average(stats.average_hit_time, count, elapsed_ms);
        stats.hits = count + 1;
        trace!(operation, elapsed_ms, "cache hit");
    }

    /// Records a cache miss that took `elapsed_ms` milliseconds
    pub fn miss(
        &self,
        operation: &str,
        elapsed_ms: f64,
    ) {
        let mut operations = self.operations.lock();
        let stats = operations.entry(operation.to_string()).or_default();

        let count = stats.misses.min(self.max_history);
        stats.average_miss_time = fold_average(stats.average_miss_time, count, elapsed_ms);
        stats.misses = count + 1;
        trace!(operation, elapsed_ms, "cache miss");
    }

    pub fn hit_duration(
        &self,
        operation: &str,
        elapsed: Duration,
    ) {
        self.hit(operation, duration_as_ms(elapsed));
    }

    pub fn miss_duration(
        &self,
        operation: &str,
        elapsed: Duration,
    ) {
        self.miss(operation, duration_as_ms(elapsed));
    }

    /// Names of every operation with at least one sample, sorted
    pub fn operations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operations.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn operation_data(
        &self,
        operation: &str,
    ) -> Option<CacheStats> {
        self.operations.lock().get(operation).copied()
    }

    pub fn operation_stats(
        &self,
        operation: &str,
    ) -> Option<CacheMetrics> {
        self.operation_data(operation)
            .map(|stats| compute_metrics(operation, &stats))
    }

    /// Human readable summary for `operation`.
    ///
    /// Reads from `source` when given (e.g. a combined cluster-wide map),
    /// otherwise from this table. Unknown operations render as "".
    pub fn operation_stats_string(
        &self,
        operation: &str,
        source: Option<&HashMap<String, CacheStats>>,
    ) -> String {
        let stats = match source {
            Some(map) => map.get(operation).copied(),
            None => self.operation_data(operation),
        };

        match stats {
            Some(stats) => render_stats(operation, &stats),
            None => String::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn set_operation_data(
        &self,
        operation: &str,
        stats: CacheStats,
    ) {
        self.operations.lock().insert(operation.to_string(), stats);
    }
}

fn fold_average(
    average: f64,
    count: u64,
    sample: f64,
) -> f64 {
    let count = count as f64;
    (average * count + sample) / (count + 1.0)
}

fn ratio(
    numerator: f64,
    denominator: f64,
) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Derives ratios from raw counters. Every zero denominator yields 0.
pub fn compute_metrics(
    operation: &str,
    stats: &CacheStats,
) -> CacheMetrics {
    let hits = stats.hits as f64;
    let misses = stats.misses as f64;
    let total = hits + misses;

    let hit_ratio = ratio(hits, total);
    let time_saved_ratio = (hit_ratio
        * ratio(stats.average_miss_time - stats.average_hit_time, stats.average_miss_time))
    .max(0.0);
    let performance_gain = ratio(stats.average_miss_time, stats.average_hit_time);
    let processing_ratio = ratio(
        stats.average_hit_time * hits + stats.average_miss_time * misses,
        stats.average_miss_time * total,
    );

    CacheMetrics {
        operation: operation.to_string(),
        hit_ratio,
        time_saved_ratio,
        performance_gain,
        processing_ratio,
    }
}

fn render_stats(
    operation: &str,
    stats: &CacheStats,
) -> String {
    let metrics = compute_metrics(operation, stats);
    format!(
        "{operation}: hits={} misses={} avgHit={:.3}ms avgMiss={:.3}ms hitRatio={:.2}% timeSaved={:.2}% gain={:.2}x",
        stats.hits,
        stats.misses,
        stats.average_hit_time,
        stats.average_miss_time,
        metrics.hit_ratio * 100.0,
        metrics.time_saved_ratio * 100.0,
        metrics.performance_gain,
    )
}
