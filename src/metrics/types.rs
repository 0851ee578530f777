use serde::Deserialize;
use serde::Serialize;

/// Raw per-operation counters, as exchanged in `stats-reply` messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Running average of hit latency, in milliseconds
    pub average_hit_time: f64,
    /// Running average of miss latency, in milliseconds
    pub average_miss_time: f64,
}

/// Ratios derived from [`CacheStats`] for one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    pub operation: String,
    /// Share of requests served from cache
    pub hit_ratio: f64,
    /// How much of the uncached latency was avoided overall
    pub time_saved_ratio: f64,
    /// How many times faster a hit is than a miss on average
    pub performance_gain: f64,
    /// Observed processing time relative to serving every request uncached
    pub processing_ratio: f64,
}
