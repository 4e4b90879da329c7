//! Downstream validation of raw HSI frames.
//!
//! Mirrors the checks a data link handler applies to frames read from the
//! raw data connection: the payload must decode, and timestamps must be
//! non-zero and must not go backwards.

use hsi_common::time::Timestamp;
use hsi_dataformats::HsiFrame;
use serde::Serialize;
use tracing::{trace, warn};

/// Log prefix for integrity violations.
pub const DATA_INTEGRITY_ERROR: &str = "*** Data Integrity ERROR ***";

/// Integrity findings for one timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntegrityReport {
    /// Previous timestamp, when the new one is smaller.
    pub backwards_from: Option<Timestamp>,
    /// The timestamp is zero.
    pub zero: bool,
}

impl IntegrityReport {
    /// Whether no violation was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.backwards_from.is_none() && !self.zero
    }
}

/// Tracks the previous timestamp of a stream.
#[derive(Debug, Clone, Default)]
pub struct MonotonicityValidator {
    previous: Option<Timestamp>,
}

impl MonotonicityValidator {
    /// Create a validator with no history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check `timestamp` against the previous one and remember it.
    pub fn check(&mut self, timestamp: Timestamp) -> IntegrityReport {
        let report = IntegrityReport {
            backwards_from: self.previous.filter(|&previous| timestamp < previous),
            zero: timestamp == 0,
        };
        self.previous = Some(timestamp);
        report
    }

    /// Forget the stream history, e.g. at a run boundary.
    pub fn reset(&mut self) {
        self.previous = None;
    }
}

/// Frame processing counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameProcessorStats {
    /// Frames decoded successfully.
    pub processed: u64,
    /// Payloads that failed to decode.
    pub decode_errors: u64,
    /// Frames whose timestamp went backwards.
    pub backwards_timestamps: u64,
    /// Frames carrying a zero timestamp.
    pub zero_timestamps: u64,
    /// Timestamp of the last decoded frame.
    pub last_timestamp: Timestamp,
}

/// Decodes and validates raw frames.
#[derive(Debug, Default)]
pub struct FrameProcessor {
    validator: MonotonicityValidator,
    stats: FrameProcessorStats,
}

impl FrameProcessor {
    /// Create a processor with empty counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode and validate one payload.
    ///
    /// Returns the decoded frame, or `None` if the payload is malformed.
    /// Integrity violations are logged and counted but the frame is still
    /// returned.
    pub fn process(&mut self, payload: &[u8]) -> Option<HsiFrame> {
        let frame = match HsiFrame::from_bytes(payload) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.decode_errors += 1;
                warn!("{DATA_INTEGRITY_ERROR} undecodable HSI frame: {e}");
                return None;
            }
        };

        let report = self.validator.check(frame.timestamp);
        if let Some(previous) = report.backwards_from {
            self.stats.backwards_timestamps += 1;
            warn!(
                previous,
                current = frame.timestamp,
                sequence = frame.sequence,
                "{DATA_INTEGRITY_ERROR} timestamp went backwards"
            );
        }
        if report.zero {
            self.stats.zero_timestamps += 1;
            warn!(sequence = frame.sequence, "{DATA_INTEGRITY_ERROR} zero timestamp");
        }

        trace!(
            timestamp = frame.timestamp,
            input_low = format_args!("{:#x}", frame.input_low),
            trigger = format_args!("{:#x}", frame.trigger),
            sequence = frame.sequence,
            "Processed HSI frame"
        );

        self.stats.processed += 1;
        self.stats.last_timestamp = frame.timestamp;
        Some(frame)
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> FrameProcessorStats {
        self.stats
    }

    /// Total integrity violations seen.
    #[must_use]
    pub fn integrity_errors(&self) -> u64 {
        self.stats.backwards_timestamps + self.stats.zero_timestamps
    }

    /// Clear counters and timestamp history.
    pub fn reset(&mut self) {
        self.validator.reset();
        self.stats = FrameProcessorStats::default();
    }
}
