//! Raw HSI frame codec.
//!
//! A frame is seven little-endian 32-bit words:
//!
//! | word | content |
//! |------|---------|
//! | 0 | header: version (bits 0-5), detector id (6-11), crate (12-21), slot (22-25), link (26-31) |
//! | 1 | timestamp, low 32 bits |
//! | 2 | timestamp, high 32 bits |
//! | 3 | input low: raw signal map |
//! | 4 | input high: reserved |
//! | 5 | trigger map |
//! | 6 | sequence counter, low 32 bits |
//!
//! Any change to this layout requires a new header version.

use hsi_common::error::HsiError;
use hsi_common::time::Timestamp;
use serde::Serialize;
use static_assertions::const_assert_eq;

/// Size of an encoded frame in bytes.
pub const HSI_FRAME_SIZE: usize = 28;

/// Number of 32-bit words in a frame.
const WORD_COUNT: usize = 7;

const_assert_eq!(HSI_FRAME_SIZE, WORD_COUNT * std::mem::size_of::<u32>());

/// An encoded frame, as carried on the raw data connection.
pub type FrameBytes = [u8; HSI_FRAME_SIZE];

/// Frame format version written by this codec.
pub const HSI_FRAME_VERSION: u8 = 1;

/// Detector type tag identifying an HSI source.
pub const HSI_DETECTOR_ID: u8 = 1;

/// Decoded word 0 of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameHeader {
    /// 6-bit format version.
    pub version: u8,
    /// 6-bit detector type tag.
    pub detector_id: u8,
    /// 10-bit crate number.
    pub crate_no: u16,
    /// 4-bit slot number.
    pub slot_no: u8,
    /// 6-bit link number.
    pub link_no: u8,
}

impl Default for FrameHeader {
    fn default() -> Self {
        Self {
            version: HSI_FRAME_VERSION,
            detector_id: HSI_DETECTOR_ID,
            crate_no: 0,
            slot_no: 0,
            link_no: 0,
        }
    }
}

impl FrameHeader {
    /// Pack into a header word. Fields wider than their bit range are truncated.
    #[must_use]
    pub fn to_word(&self) -> u32 {
        u32::from(self.version & 0x3F)
            | u32::from(self.detector_id & 0x3F) << 6
            | u32::from(self.crate_no & 0x3FF) << 12
            | u32::from(self.slot_no & 0x0F) << 22
            | u32::from(self.link_no & 0x3F) << 26
    }

    /// Unpack a header word.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_word(word: u32) -> Self {
        Self {
            version: (word & 0x3F) as u8,
            detector_id: ((word >> 6) & 0x3F) as u8,
            crate_no: ((word >> 12) & 0x3FF) as u16,
            slot_no: ((word >> 22) & 0x0F) as u8,
            link_no: ((word >> 26) & 0x3F) as u8,
        }
    }
}

/// One raw HSI frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HsiFrame {
    /// Frame header.
    pub header: FrameHeader,
    /// Global DAQ clock value.
    pub timestamp: Timestamp,
    /// Raw signal map.
    pub input_low: u32,
    /// Reserved, always zero when emitted by the emulator.
    pub input_high: u32,
    /// Signal map masked by the enabled signals.
    pub trigger: u32,
    /// Low 32 bits of the event sequence counter.
    pub sequence: u32,
}

impl HsiFrame {
    /// Build a frame for one emitted event.
    ///
    /// The sequence counter is truncated to its low 32 bits.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(
        timestamp: Timestamp,
        signal_map: u32,
        trigger_map: u32,
        sequence_counter: u64,
    ) -> Self {
        Self {
            header: FrameHeader::default(),
            timestamp,
            input_low: signal_map,
            input_high: 0,
            trigger: trigger_map,
            sequence: sequence_counter as u32,
        }
    }

    /// Serialize the frame to bytes (little-endian words).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_bytes(&self) -> FrameBytes {
        let words: [u32; WORD_COUNT] = [
            self.header.to_word(),
            self.timestamp as u32,
            (self.timestamp >> 32) as u32,
            self.input_low,
            self.input_high,
            self.trigger,
            self.sequence,
        ];

        let mut bytes = [0u8; HSI_FRAME_SIZE];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// Parse a frame from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Length`] if `bytes` is not exactly one frame long,
    /// or [`FrameError::UnsupportedVersion`] for an unknown header version.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() != HSI_FRAME_SIZE {
            return Err(FrameError::Length {
                expected: HSI_FRAME_SIZE,
                actual: bytes.len(),
            });
        }

        let mut words = [0u32; WORD_COUNT];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }

        let header = FrameHeader::from_word(words[0]);
        if header.version != HSI_FRAME_VERSION {
            return Err(FrameError::UnsupportedVersion(header.version));
        }

        Ok(Self {
            header,
            timestamp: u64::from(words[1]) | u64::from(words[2]) << 32,
            input_low: words[3],
            input_high: words[4],
            trigger: words[5],
            sequence: words[6],
        })
    }
}

/// Raw frame decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Buffer is not exactly one frame long.
    #[error("invalid frame length: expected {expected} bytes, got {actual}")]
    Length {
        /// Required length.
        expected: usize,
        /// Length received.
        actual: usize,
    },

    /// Header carries a version this codec does not understand.
    #[error("unsupported frame version {0}")]
    UnsupportedVersion(u8),
}

impl From<FrameError> for HsiError {
    fn from(err: FrameError) -> Self {
        HsiError::FrameDecode(err.to_string())
    }
}
