use std::time::Duration;

use tokio::time::Instant;

/// Milliseconds elapsed since `start`, with sub-millisecond precision
pub(crate) fn elapsed_ms(start: Instant) -> f64 {
    duration_as_ms(start.elapsed())
}

pub(crate) fn duration_as_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Saturating conversion used for wire fields expressed in milliseconds
pub(crate) fn duration_as_millis_u64(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
