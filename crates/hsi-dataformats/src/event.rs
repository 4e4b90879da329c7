//! Structured messages: HSI events and time-sync samples.

use hsi_common::time::Timestamp;
use serde::{Deserialize, Serialize};

/// One emulated HSI trigger event, as delivered to the trigger system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsiEvent {
    /// Device identifier of the emitting HSI.
    pub header: u32,
    /// Signal lines that fired a trigger (raw map masked by the enabled signals).
    pub signal_map: u32,
    /// Global DAQ clock value.
    pub timestamp: Timestamp,
    /// 1-based, strictly increasing within a run.
    pub sequence_counter: u64,
    /// Run the event belongs to.
    pub run_number: u32,
}

impl HsiEvent {
    /// Create a new event.
    #[must_use]
    pub fn new(
        device_id: u32,
        signal_map: u32,
        timestamp: Timestamp,
        sequence_counter: u64,
        run_number: u32,
    ) -> Self {
        Self {
            header: device_id,
            signal_map,
            timestamp,
            sequence_counter,
            run_number,
        }
    }

    /// Device identifier carried in the header.
    #[must_use]
    pub fn device_id(&self) -> u32 {
        self.header
    }
}

/// Clock-correlation sample: the DAQ clock value observed at a wall-clock instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TimeSync {
    /// DAQ clock value at `system_time_us`.
    pub daq_time: Timestamp,
    /// Wall-clock time of the sample in microseconds since the Unix epoch.
    pub system_time_us: u64,
    /// Publisher sequence number.
    pub sequence_number: u64,
    /// Run the sample was published for.
    pub run_number: u32,
    /// Process id of the publisher.
    pub source_pid: u32,
}

impl TimeSync {
    /// Whether this sample carries a usable clock value for `run_number`.
    #[must_use]
    pub fn is_valid_for(&self, run_number: u32) -> bool {
        self.daq_time != 0 && self.run_number == run_number
    }
}
