use crate::protocol::{self, ProtocolRevision, CELL_COUNT};
use crate::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Per cell estimates computed by the S32K firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StateEstimation {
    /// State of charge in permille.
    pub state_of_charge: [i64; CELL_COUNT],
    /// State of health in permille.
    pub state_of_health: [i64; CELL_COUNT],
    pub equivalent_full_cycles: i64,
}

/// One decoded telemetry frame in raw firmware units.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Telemetry {
    pub revision: ProtocolRevision,
    pub pack_voltage: i64,
    pub cell_voltages: [i64; CELL_COUNT],
    /// 0.1 °C fixed point.
    pub ic_temperature: i64,
    /// Signed pack current in mA, absent from the basic revision.
    pub pack_current: Option<i64>,
    pub state_estimation: Option<StateEstimation>,
    pub balancing: Option<[bool; CELL_COUNT]>,
}

fn cells(words: &[i64], offset: usize) -> [i64; CELL_COUNT] {
    let mut result = [0; CELL_COUNT];
    result.copy_from_slice(&words[offset..offset + CELL_COUNT]);
    result
}

impl Telemetry {
    /// Splits a decoded word array into channels. The word count selects the revision.
    pub fn from_words(words: &[i64]) -> std::result::Result<Self, Error> {
        let revision = ProtocolRevision::from_word_count(words.len()).ok_or_else(|| {
            log::warn!("Unexpected word count {}", words.len());
            Error::FrameSizeError(words.len() * protocol::WORD_SIZE)
        })?;

        let state_estimation = revision.has_state_estimation().then(|| StateEstimation {
            state_of_charge: cells(words, protocol::STATE_OF_CHARGE),
            state_of_health: cells(words, protocol::STATE_OF_HEALTH),
            equivalent_full_cycles: words[protocol::EQUIVALENT_FULL_CYCLE],
        });
        let balancing = revision.has_balancing().then(|| {
            let mut flags = [false; CELL_COUNT];
            for (flag, word) in flags
                .iter_mut()
                .zip(&words[protocol::CELL_BALANCING..protocol::CELL_BALANCING + CELL_COUNT])
            {
                *flag = *word != 0;
            }
            flags
        });

        Ok(Self {
            revision,
            pack_voltage: words[protocol::PACK_VOLTAGE],
            cell_voltages: cells(words, protocol::CELL_VOLTAGE),
            ic_temperature: words[protocol::IC_TEMPERATURE],
            pack_current: revision
                .has_current()
                .then(|| words[protocol::PACK_CURRENT]),
            state_estimation,
            balancing,
        })
    }

    /// Decodes a raw frame straight into channels.
    pub fn decode(rx_buffer: &[u8]) -> std::result::Result<Self, Error> {
        Self::from_words(&protocol::decode(rx_buffer)?)
    }

    /// Flattens back into the wire channel order.
    pub fn to_words(&self) -> Vec<i64> {
        let mut words = Vec::with_capacity(self.revision.word_count());
        words.push(self.pack_voltage);
        words.extend_from_slice(&self.cell_voltages);
        words.push(self.ic_temperature);
        if self.revision.has_current() {
            words.push(self.pack_current.unwrap_or_default());
        }
        if self.revision.has_state_estimation() {
            let estimation = self.state_estimation.unwrap_or_default();
            words.extend_from_slice(&estimation.state_of_charge);
            words.extend_from_slice(&estimation.state_of_health);
            words.push(estimation.equivalent_full_cycles);
        }
        if self.revision.has_balancing() {
            let flags = self.balancing.unwrap_or_default();
            words.extend(flags.iter().map(|&on| i64::from(on)));
        }
        words
    }

    pub fn encode(&self) -> std::result::Result<Vec<u8>, Error> {
        protocol::encode(&self.to_words())
    }
}
