//! DAQ clock helpers.
//!
//! Timestamps are counts of the global DAQ clock, not wall-clock time.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Global DAQ clock value in ticks.
pub type Timestamp = u64;

/// Convert an elapsed duration into clock ticks at `clock_frequency_hz`.
///
/// Uses 128-bit intermediate math so large frequencies and long runs cannot overflow;
/// the result saturates at `u64::MAX`.
#[must_use]
pub fn duration_to_ticks(elapsed: Duration, clock_frequency_hz: u64) -> u64 {
    let ticks = elapsed.as_nanos() * u128::from(clock_frequency_hz) / 1_000_000_000;
    u64::try_from(ticks).unwrap_or(u64::MAX)
}

/// Apply a signed tick offset, clamping at the ends of the clock range.
#[must_use]
pub fn apply_offset(timestamp: Timestamp, offset: i64) -> Timestamp {
    timestamp.saturating_add_signed(offset)
}

/// Current wall-clock time in microseconds since the Unix epoch.
#[must_use]
pub fn system_time_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
}
