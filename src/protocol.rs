use crate::Error;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of series cells monitored by one MC33771C.
pub const CELL_COUNT: usize = 14;

/// Every measurement word occupies four bytes on the wire.
pub const WORD_SIZE: usize = 4;

// Reconstructed words above this value are negative readings.
// It sits below 2^32 and above any plausible positive measurement.
pub const SIGN_THRESHOLD: i64 = 4_000_000_000;
const WORD_RANGE: i64 = 1 << 32;

// Channel order of the decoded word array
pub const PACK_VOLTAGE: usize = 0;
pub const CELL_VOLTAGE: usize = 1;
pub const IC_TEMPERATURE: usize = 15;
pub const PACK_CURRENT: usize = 16;
pub const STATE_OF_CHARGE: usize = 17;
pub const STATE_OF_HEALTH: usize = STATE_OF_CHARGE + CELL_COUNT;
pub const EQUIVALENT_FULL_CYCLE: usize = STATE_OF_HEALTH + CELL_COUNT;
pub const CELL_BALANCING: usize = EQUIVALENT_FULL_CYCLE + 1;

/// Words every revision carries: pack voltage, cell voltages and IC temperature.
pub const MINIMUM_WORDS: usize = IC_TEMPERATURE + 1;

/// Firmware revisions of the BCC telemetry stream, identified by their frame length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ProtocolRevision {
    /// Pack voltage, 14 cell voltages and IC temperature.
    Basic,
    /// Adds pack current, per cell SoC/SoH and the equivalent full cycle counter.
    StateEstimation,
    /// Adds the per cell balancing indicators.
    Balancing,
}

impl ProtocolRevision {
    pub const ALL: [ProtocolRevision; 3] = [
        ProtocolRevision::Basic,
        ProtocolRevision::StateEstimation,
        ProtocolRevision::Balancing,
    ];

    pub const fn word_count(self) -> usize {
        match self {
            ProtocolRevision::Basic => MINIMUM_WORDS,
            ProtocolRevision::StateEstimation => EQUIVALENT_FULL_CYCLE + 1,
            ProtocolRevision::Balancing => CELL_BALANCING + CELL_COUNT,
        }
    }

    pub const fn frame_len(self) -> usize {
        self.word_count() * WORD_SIZE
    }

    pub fn from_frame_len(len: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|rev| rev.frame_len() == len)
    }

    pub fn from_word_count(count: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|rev| rev.word_count() == count)
    }

    pub const fn has_current(self) -> bool {
        self.word_count() > PACK_CURRENT
    }

    pub const fn has_state_estimation(self) -> bool {
        self.word_count() > EQUIVALENT_FULL_CYCLE
    }

    pub const fn has_balancing(self) -> bool {
        self.word_count() > CELL_BALANCING
    }

    pub fn scaling(self) -> Scaling {
        Scaling::default()
    }
}

impl fmt::Display for ProtocolRevision {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolRevision::Basic => write!(f, "basic ({} bytes)", self.frame_len()),
            ProtocolRevision::StateEstimation => {
                write!(f, "state-estimation ({} bytes)", self.frame_len())
            }
            ProtocolRevision::Balancing => write!(f, "balancing ({} bytes)", self.frame_len()),
        }
    }
}

/// Divisors turning raw fixed point words into engineering units.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Scaling {
    /// µV to mV by default. Some firmware builds report in a finer unit and need 1_000_000.
    pub voltage_divisor: f64,
    /// Temperature words are 0.1 °C fixed point.
    pub temperature_divisor: f64,
    /// Current words are plain mA.
    pub current_divisor: f64,
}

impl Default for Scaling {
    fn default() -> Self {
        Self {
            voltage_divisor: 1000.0,
            temperature_divisor: 10.0,
            current_divisor: 1.0,
        }
    }
}

fn validate_len(buffer: &[u8]) -> std::result::Result<ProtocolRevision, Error> {
    match ProtocolRevision::from_frame_len(buffer.len()) {
        Some(revision) => Ok(revision),
        None => {
            log::warn!("Invalid frame size - received={}", buffer.len());
            Err(Error::FrameSizeError(buffer.len()))
        }
    }
}

fn recover_sign(raw: u32) -> i64 {
    let value = i64::from(raw);
    if value > SIGN_THRESHOLD {
        value - WORD_RANGE
    } else {
        value
    }
}

fn decode_words(rx_buffer: &[u8]) -> Vec<i64> {
    // The firmware sends its u32 array as little endian words in channel order.
    // Reversing the frame, reading big endian words and reversing the word list
    // yields the same thing.
    rx_buffer
        .chunks_exact(WORD_SIZE)
        .map(|word| recover_sign(u32::from_le_bytes([word[0], word[1], word[2], word[3]])))
        .collect()
}

/// Decodes a complete frame of any supported revision into its signed measurement words.
pub fn decode(rx_buffer: &[u8]) -> std::result::Result<Vec<i64>, Error> {
    let revision = validate_len(rx_buffer)?;
    let words = decode_words(rx_buffer);
    log::trace!("Decoded {} frame: {:?}", revision, words);
    Ok(words)
}

/// Like [`decode`], but only accepts frames of the given revision.
pub fn decode_as(
    rx_buffer: &[u8],
    revision: ProtocolRevision,
) -> std::result::Result<Vec<i64>, Error> {
    if rx_buffer.len() != revision.frame_len() {
        log::warn!(
            "Invalid frame size - required={} received={}",
            revision.frame_len(),
            rx_buffer.len()
        );
        return Err(Error::FrameSizeError(rx_buffer.len()));
    }
    Ok(decode_words(rx_buffer))
}

/// Encodes words the way the firmware transmits them.
pub fn encode(words: &[i64]) -> std::result::Result<Vec<u8>, Error> {
    let mut tx_buffer = Vec::with_capacity(words.len() * WORD_SIZE);
    for &word in words {
        let raw = if (0..=SIGN_THRESHOLD).contains(&word) {
            word
        } else if (SIGN_THRESHOLD + 1 - WORD_RANGE..0).contains(&word) {
            word + WORD_RANGE
        } else {
            return Err(Error::RangeError(word));
        };
        tx_buffer.extend_from_slice(&(raw as u32).to_le_bytes());
    }
    Ok(tx_buffer)
}
