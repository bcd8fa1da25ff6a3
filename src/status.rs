use crate::protocol::CELL_COUNT;
use crate::Error;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Pack voltage limits are the cell limits scaled by the number of series cells.
pub const PACK_VOLTAGE_FACTOR: i32 = CELL_COUNT as i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementKind {
    Voltage,
    Current,
    Temperature,
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MeasurementKind::Voltage => write!(f, "voltage"),
            MeasurementKind::Current => write!(f, "current"),
            MeasurementKind::Temperature => write!(f, "temperature"),
        }
    }
}

/// Where a reading falls relative to a [`ThresholdPair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Below,
    Within,
    Above,
}

/// Inclusive (minimum, maximum) bounds in mV, mA or °C.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ThresholdPair {
    pub min: i32,
    pub max: i32,
}

impl ThresholdPair {
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn classify(&self, value: f64) -> Classification {
        if value > f64::from(self.max) {
            Classification::Above
        } else if value < f64::from(self.min) {
            Classification::Below
        } else {
            Classification::Within
        }
    }

    pub fn scaled(&self, factor: i32) -> Self {
        Self {
            min: self.min.saturating_mul(factor),
            max: self.max.saturating_mul(factor),
        }
    }

    fn validate(&self, kind: MeasurementKind) -> std::result::Result<(), Error> {
        if self.min > self.max {
            log::warn!(
                "Rejecting {} threshold - min={} max={}",
                kind,
                self.min,
                self.max
            );
            return Err(Error::ThresholdError {
                kind,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

impl fmt::Display for ThresholdPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Cell voltage (mV), pack current magnitude (mA) and IC temperature (°C) limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Thresholds {
    pub voltage: ThresholdPair,
    pub current: ThresholdPair,
    pub temperature: ThresholdPair,
}

/// Li-ion cell window of 2.8 V to 4.3 V, 1.6 A and 20 °C to 105 °C on the BCC die.
impl Default for Thresholds {
    fn default() -> Self {
        Self {
            voltage: ThresholdPair::new(2800, 4300),
            current: ThresholdPair::new(0, 1600),
            temperature: ThresholdPair::new(20, 105),
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> std::result::Result<(), Error> {
        self.voltage.validate(MeasurementKind::Voltage)?;
        self.current.validate(MeasurementKind::Current)?;
        self.temperature.validate(MeasurementKind::Temperature)
    }

    pub fn pack_voltage(&self) -> ThresholdPair {
        self.voltage.scaled(PACK_VOLTAGE_FACTOR)
    }
}

macro_rules! status_enum {
    ($name:ident, $under:ident, $over:ident, $under_str:literal, $over_str:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        #[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
        pub enum $name {
            #[default]
            Normal,
            $under,
            $over,
        }

        impl $name {
            pub fn is_fault(&self) -> bool {
                !matches!(self, $name::Normal)
            }
        }

        impl From<Classification> for $name {
            fn from(classification: Classification) -> Self {
                match classification {
                    Classification::Below => $name::$under,
                    Classification::Within => $name::Normal,
                    Classification::Above => $name::$over,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                match self {
                    $name::Normal => write!(f, "NORMAL"),
                    $name::$under => write!(f, $under_str),
                    $name::$over => write!(f, $over_str),
                }
            }
        }
    };
}

status_enum!(
    VoltageStatus,
    Undervoltage,
    Overvoltage,
    "UNDERVOLTAGE",
    "OVERVOLTAGE"
);
status_enum!(
    CurrentStatus,
    Undercurrent,
    Overcurrent,
    "UNDERCURRENT",
    "OVERCURRENT"
);
status_enum!(
    TemperatureStatus,
    Undertemperature,
    Overtemperature,
    "UNDERTEMPERATURE",
    "OVERTEMPERATURE"
);

/// A monitored channel that owns a status latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    PackVoltage,
    PackCurrent,
    IcTemperature,
    /// Cell number, 1 based.
    CellVoltage(u8),
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Channel::PackVoltage => write!(f, "packVoltage"),
            Channel::PackCurrent => write!(f, "packCurrent"),
            Channel::IcTemperature => write!(f, "icTemperature"),
            Channel::CellVoltage(n) => write!(f, "cellVoltage_{n}"),
        }
    }
}

/// Sticky status of one channel: once a fault is recorded it stays until [`Latch::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Latch<S> {
    status: S,
    latched: bool,
}

impl<S> Latch<S>
where
    S: From<Classification> + Copy + Default,
{
    /// Applies a classification unless the latch is already set.
    /// Returns `true` when this call tripped the latch.
    pub fn evaluate(&mut self, classification: Classification) -> bool {
        if self.latched {
            return false;
        }
        self.status = S::from(classification);
        self.latched = classification != Classification::Within;
        self.latched
    }

    pub fn reset(&mut self) {
        self.status = S::default();
        self.latched = false;
    }

    pub fn status(&self) -> S {
        self.status
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }
}
