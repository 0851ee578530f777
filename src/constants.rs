// -
// Coordination stream

/// Stream record id prefix used by `MemoryStream` (`<seq>-0`)
pub(crate) const STREAM_ID_SEPARATOR: char = '-';

/// Separator between operation name and key in lock and unlock identifiers
pub(crate) const OPERATION_KEY_SEPARATOR: char = '#';

// -
// Statistics

/// Default ceiling for the running-average history window
pub(crate) const DEFAULT_MAX_HISTORY: u64 = 10_000;
