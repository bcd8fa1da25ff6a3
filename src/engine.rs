//! Threshold evaluation and sticky status latching for decoded BCC telemetry.
//!
//! Every monitored channel owns a [`Latch`]. The first out of range reading
//! latches the channel's fault status, and later frames do not change it,
//! so a transient overvoltage stays visible until the operator calls
//! [`TelemetryStateEngine::reset_status`].

use crate::protocol::{ProtocolRevision, Scaling, CELL_COUNT, MINIMUM_WORDS};
use crate::status::{
    Channel, CurrentStatus, Latch, TemperatureStatus, ThresholdPair, Thresholds, VoltageStatus,
};
use crate::telemetry::Telemetry;
use crate::Error;

#[cfg(feature = "serde")]
use serde::Serialize;

/// Most recent scaled measurements.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct LiveValues {
    /// mV
    pub pack_voltage: f64,
    /// mV
    pub cell_voltages: [f64; CELL_COUNT],
    /// mA, signed: the firmware reports charge and discharge with opposite signs
    pub pack_current: f64,
    /// °C
    pub ic_temperature: f64,
    /// permille
    pub state_of_charge: [i64; CELL_COUNT],
    /// permille
    pub state_of_health: [i64; CELL_COUNT],
    pub equivalent_full_cycles: i64,
    pub balancing: [bool; CELL_COUNT],
}

/// Immutable copy of the engine's observable state, safe to hand to another thread.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Snapshot {
    pub values: LiveValues,
    pub pack_voltage_status: VoltageStatus,
    pub pack_current_status: CurrentStatus,
    pub ic_temperature_status: TemperatureStatus,
    pub cell_voltage_status: [VoltageStatus; CELL_COUNT],
    pub cell_current_status: [CurrentStatus; CELL_COUNT],
}

impl Snapshot {
    /// Measurements keyed by the column names used by the recording tools.
    pub fn named_values(&self) -> Vec<(String, f64)> {
        let values = &self.values;
        let mut named = Vec::with_capacity(4 + 4 * CELL_COUNT);
        named.push(("packVoltage".to_string(), values.pack_voltage));
        for (i, v) in values.cell_voltages.iter().enumerate() {
            named.push((format!("cellVoltage_{}", i + 1), *v));
        }
        named.push(("icTemperature".to_string(), values.ic_temperature));
        named.push(("packCurrent".to_string(), values.pack_current));
        for (i, v) in values.state_of_charge.iter().enumerate() {
            named.push((format!("cellSoC_{}", i + 1), *v as f64));
        }
        for (i, v) in values.state_of_health.iter().enumerate() {
            named.push((format!("cellSoH_{}", i + 1), *v as f64));
        }
        named.push((
            "equivalentFullCycle".to_string(),
            values.equivalent_full_cycles as f64,
        ));
        for (i, on) in values.balancing.iter().enumerate() {
            named.push((format!("cellCB_{}", i + 1), if *on { 1.0 } else { 0.0 }));
        }
        named
    }

    /// Status strings keyed by channel name.
    pub fn named_statuses(&self) -> Vec<(String, String)> {
        let mut named = vec![
            (
                "packVoltageStatus".to_string(),
                self.pack_voltage_status.to_string(),
            ),
            (
                "packCurrentStatus".to_string(),
                self.pack_current_status.to_string(),
            ),
            (
                "icTemperatureStatus".to_string(),
                self.ic_temperature_status.to_string(),
            ),
        ];
        for (i, status) in self.cell_voltage_status.iter().enumerate() {
            named.push((format!("cellVoltageStatus_{}", i + 1), status.to_string()));
        }
        for (i, status) in self.cell_current_status.iter().enumerate() {
            named.push((format!("cellCurrentStatus_{}", i + 1), status.to_string()));
        }
        named
    }

    pub fn has_fault(&self) -> bool {
        self.pack_voltage_status.is_fault()
            || self.pack_current_status.is_fault()
            || self.ic_temperature_status.is_fault()
            || self.cell_voltage_status.iter().any(VoltageStatus::is_fault)
    }
}

/// Operator actions on a running engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    ResetStatus,
    ClearData,
    SetThresholds(Thresholds),
}

/// Parses the text form used on consoles and command topics: `reset` or `clear`.
impl std::str::FromStr for EngineCommand {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reset" | "reset-status" => Ok(EngineCommand::ResetStatus),
            "clear" | "clear-data" => Ok(EngineCommand::ClearData),
            _ => Err(Error::CommandError(s.trim().to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryStateEngine {
    thresholds: Thresholds,
    pack_voltage_threshold: ThresholdPair,
    scaling: Scaling,
    values: LiveValues,
    pack_voltage: Latch<VoltageStatus>,
    pack_current: Latch<CurrentStatus>,
    ic_temperature: Latch<TemperatureStatus>,
    cell_voltage: [Latch<VoltageStatus>; CELL_COUNT],
}

impl Default for TelemetryStateEngine {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}

impl TelemetryStateEngine {
    /// Creates an engine with everything unlatched and all live values zero.
    ///
    /// Invalid thresholds are replaced by the defaults. Use [`Self::set_thresholds`]
    /// to get the validation error instead.
    pub fn new(thresholds: Thresholds) -> Self {
        let thresholds = match thresholds.validate() {
            Ok(()) => thresholds,
            Err(err) => {
                log::warn!("{err}, falling back to default thresholds");
                Thresholds::default()
            }
        };
        Self {
            thresholds,
            pack_voltage_threshold: thresholds.pack_voltage(),
            scaling: Scaling::default(),
            values: LiveValues::default(),
            pack_voltage: Latch::default(),
            pack_current: Latch::default(),
            ic_temperature: Latch::default(),
            cell_voltage: [Latch::default(); CELL_COUNT],
        }
    }

    pub fn with_scaling(mut self, scaling: Scaling) -> Self {
        self.scaling = scaling;
        self
    }

    pub fn for_revision(revision: ProtocolRevision, thresholds: Thresholds) -> Self {
        Self::new(thresholds).with_scaling(revision.scaling())
    }

    /// Replaces all three threshold pairs and recomputes the derived pack voltage pair.
    ///
    /// A pair with `min > max` is rejected and the previous configuration stays active.
    pub fn set_thresholds(&mut self, thresholds: Thresholds) -> std::result::Result<(), Error> {
        thresholds.validate()?;
        self.thresholds = thresholds;
        self.pack_voltage_threshold = thresholds.pack_voltage();
        log::info!(
            "Thresholds set - voltage={} current={} temperature={} pack voltage={}",
            thresholds.voltage,
            thresholds.current,
            thresholds.temperature,
            self.pack_voltage_threshold
        );
        Ok(())
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn pack_voltage_threshold(&self) -> ThresholdPair {
        self.pack_voltage_threshold
    }

    pub fn scaling(&self) -> &Scaling {
        &self.scaling
    }

    /// Per frame update from a decoded word array.
    ///
    /// The array must hold at least pack voltage, the cell voltages and IC temperature.
    /// [`crate::protocol::decode`] guarantees this for every frame it accepts; a shorter
    /// array is logged and ignored.
    pub fn ingest(&mut self, words: &[i64]) {
        if words.len() < MINIMUM_WORDS {
            log::error!(
                "Ignoring word array of length {} - required={}",
                words.len(),
                MINIMUM_WORDS
            );
            return;
        }
        match Telemetry::from_words(words) {
            Ok(telemetry) => self.ingest_telemetry(&telemetry),
            Err(_) => {
                // Unknown layout: still take the channels every revision shares
                let mut telemetry = match Telemetry::from_words(&words[..MINIMUM_WORDS]) {
                    Ok(telemetry) => telemetry,
                    Err(err) => {
                        log::error!("Cannot split word array: {err}");
                        return;
                    }
                };
                telemetry.pack_current = words.get(crate::protocol::PACK_CURRENT).copied();
                self.ingest_telemetry(&telemetry);
            }
        }
    }

    pub fn ingest_telemetry(&mut self, telemetry: &Telemetry) {
        let scaling = self.scaling;

        let pack_voltage = telemetry.pack_voltage as f64 / scaling.voltage_divisor;
        self.values.pack_voltage = pack_voltage;
        let classification = self.pack_voltage_threshold.classify(pack_voltage);
        if self.pack_voltage.evaluate(classification) {
            log_latched(
                Channel::PackVoltage,
                self.pack_voltage.status(),
                pack_voltage,
            );
        }

        if let Some(current) = telemetry.pack_current {
            let current = current as f64 / scaling.current_divisor;
            self.values.pack_current = current;
            let classification = self.thresholds.current.classify(current.abs());
            if self.pack_current.evaluate(classification) {
                log_latched(Channel::PackCurrent, self.pack_current.status(), current);
            }
        }

        for (i, raw) in telemetry.cell_voltages.iter().enumerate() {
            let voltage = *raw as f64 / scaling.voltage_divisor;
            self.values.cell_voltages[i] = voltage;
            let latch = &mut self.cell_voltage[i];
            if latch.evaluate(self.thresholds.voltage.classify(voltage)) {
                log_latched(Channel::CellVoltage(i as u8 + 1), latch.status(), voltage);
            }
        }

        let temperature = telemetry.ic_temperature as f64 / scaling.temperature_divisor;
        self.values.ic_temperature = temperature;
        let classification = self.thresholds.temperature.classify(temperature);
        if self.ic_temperature.evaluate(classification) {
            log_latched(
                Channel::IcTemperature,
                self.ic_temperature.status(),
                temperature,
            );
        }

        if let Some(estimation) = &telemetry.state_estimation {
            self.values.state_of_charge = estimation.state_of_charge;
            self.values.state_of_health = estimation.state_of_health;
            self.values.equivalent_full_cycles = estimation.equivalent_full_cycles;
        }
        if let Some(balancing) = telemetry.balancing {
            self.values.balancing = balancing;
        }
        log::trace!("Ingested {} frame: {:?}", telemetry.revision, self.values);
    }

    /// Unlatches every channel and sets it back to normal. Live values are kept.
    pub fn reset_status(&mut self) {
        self.pack_voltage.reset();
        self.pack_current.reset();
        self.ic_temperature.reset();
        for latch in self.cell_voltage.iter_mut() {
            latch.reset();
        }
        log::info!("Status latches reset");
    }

    /// Zeroes all live values. Statuses and latches are kept.
    pub fn clear_data(&mut self) {
        self.values = LiveValues::default();
        log::info!("Live values cleared");
    }

    pub fn apply(&mut self, command: EngineCommand) -> std::result::Result<(), Error> {
        log::debug!("Applying {command:?}");
        match command {
            EngineCommand::ResetStatus => self.reset_status(),
            EngineCommand::ClearData => self.clear_data(),
            EngineCommand::SetThresholds(thresholds) => self.set_thresholds(thresholds)?,
        }
        Ok(())
    }

    pub fn live_values(&self) -> &LiveValues {
        &self.values
    }

    pub fn pack_voltage_status(&self) -> VoltageStatus {
        self.pack_voltage.status()
    }

    pub fn pack_current_status(&self) -> CurrentStatus {
        self.pack_current.status()
    }

    pub fn ic_temperature_status(&self) -> TemperatureStatus {
        self.ic_temperature.status()
    }

    /// Voltage status of cell `cell` (1 based).
    pub fn cell_voltage_status(&self, cell: usize) -> Option<VoltageStatus> {
        let index = cell.checked_sub(1)?;
        self.cell_voltage.get(index).map(Latch::status)
    }

    /// Cells share the pack's current sensor, so this is the pack current status.
    pub fn cell_current_status(&self, cell: usize) -> Option<CurrentStatus> {
        (1..=CELL_COUNT)
            .contains(&cell)
            .then(|| self.pack_current.status())
    }

    pub fn is_latched(&self, channel: Channel) -> bool {
        match channel {
            Channel::PackVoltage => self.pack_voltage.is_latched(),
            Channel::PackCurrent => self.pack_current.is_latched(),
            Channel::IcTemperature => self.ic_temperature.is_latched(),
            Channel::CellVoltage(n) => usize::from(n)
                .checked_sub(1)
                .and_then(|i| self.cell_voltage.get(i))
                .is_some_and(Latch::is_latched),
        }
    }

    pub fn latched_channels(&self) -> Vec<Channel> {
        let mut channels = Vec::new();
        if self.pack_voltage.is_latched() {
            channels.push(Channel::PackVoltage);
        }
        if self.pack_current.is_latched() {
            channels.push(Channel::PackCurrent);
        }
        if self.ic_temperature.is_latched() {
            channels.push(Channel::IcTemperature);
        }
        for (i, latch) in self.cell_voltage.iter().enumerate() {
            if latch.is_latched() {
                channels.push(Channel::CellVoltage(i as u8 + 1));
            }
        }
        channels
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut cell_voltage_status = [VoltageStatus::Normal; CELL_COUNT];
        for (status, latch) in cell_voltage_status.iter_mut().zip(&self.cell_voltage) {
            *status = latch.status();
        }
        Snapshot {
            values: self.values,
            pack_voltage_status: self.pack_voltage.status(),
            pack_current_status: self.pack_current.status(),
            ic_temperature_status: self.ic_temperature.status(),
            cell_voltage_status,
            cell_current_status: [self.pack_current.status(); CELL_COUNT],
        }
    }
}

fn log_latched<S: std::fmt::Display>(channel: Channel, status: S, value: f64) {
    log::warn!("{channel} latched {status} at {value}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{self, encode, PACK_CURRENT};

    // 14 cells at `cell_mv`, pack at 14x, 25 °C, `current_ma`
    fn words(cell_mv: i64, current_ma: i64) -> Vec<i64> {
        let mut words = vec![0; ProtocolRevision::StateEstimation.word_count()];
        words[protocol::PACK_VOLTAGE] = cell_mv * 14 * 1000;
        for cell in 0..CELL_COUNT {
            words[protocol::CELL_VOLTAGE + cell] = cell_mv * 1000;
        }
        words[protocol::IC_TEMPERATURE] = 250;
        words[PACK_CURRENT] = current_ma;
        words
    }

    #[test]
    fn starts_normal() {
        let engine = TelemetryStateEngine::default();
        let snapshot = engine.snapshot();
        assert!(!snapshot.has_fault());
        assert!(engine.latched_channels().is_empty());
        assert_eq!(snapshot.values, LiveValues::default());
    }

    #[test]
    fn in_range_frame_is_normal() {
        let mut engine = TelemetryStateEngine::default();
        engine.ingest(&words(3700, 800));
        assert_eq!(engine.pack_voltage_status(), VoltageStatus::Normal);
        assert_eq!(engine.pack_current_status(), CurrentStatus::Normal);
        assert_eq!(engine.ic_temperature_status(), TemperatureStatus::Normal);
        assert_eq!(engine.live_values().pack_voltage, 51800.0);
        assert_eq!(engine.live_values().cell_voltages[4], 3700.0);
        assert_eq!(engine.live_values().ic_temperature, 25.0);
        assert_eq!(engine.live_values().pack_current, 800.0);
        assert!(engine.latched_channels().is_empty());
    }

    #[test]
    fn overvoltage_is_sticky() {
        let mut engine = TelemetryStateEngine::default();
        let mut frame = words(3700, 800);
        frame[protocol::CELL_VOLTAGE + 2] = 4_400_000;
        engine.ingest(&frame);
        assert_eq!(
            engine.cell_voltage_status(3),
            Some(VoltageStatus::Overvoltage)
        );
        assert!(engine.is_latched(Channel::CellVoltage(3)));

        engine.ingest(&words(3700, 800));
        assert_eq!(
            engine.cell_voltage_status(3),
            Some(VoltageStatus::Overvoltage)
        );
        assert_eq!(engine.live_values().cell_voltages[2], 3700.0);

        // a latched channel is not re-evaluated against the opposite bound either
        engine.ingest(&words(2000, 800));
        assert_eq!(
            engine.cell_voltage_status(3),
            Some(VoltageStatus::Overvoltage)
        );

        engine.reset_status();
        assert_eq!(engine.cell_voltage_status(3), Some(VoltageStatus::Normal));
        assert!(!engine.is_latched(Channel::CellVoltage(3)));
    }

    #[test]
    fn latches_are_per_channel() {
        let mut engine = TelemetryStateEngine::default();
        let mut frame = words(3700, 800);
        frame[protocol::CELL_VOLTAGE + 2] = 4_400_000;
        engine.ingest(&frame);

        let mut frame = words(3700, 800);
        frame[protocol::CELL_VOLTAGE + 4] = 2_500_000;
        engine.ingest(&frame);

        assert_eq!(
            engine.cell_voltage_status(3),
            Some(VoltageStatus::Overvoltage)
        );
        assert_eq!(
            engine.cell_voltage_status(5),
            Some(VoltageStatus::Undervoltage)
        );
        assert_eq!(engine.cell_voltage_status(4), Some(VoltageStatus::Normal));
        assert_eq!(
            engine.latched_channels(),
            vec![Channel::CellVoltage(3), Channel::CellVoltage(5)]
        );
    }

    #[test]
    fn unlatched_channel_follows_readings() {
        let mut engine = TelemetryStateEngine::default();
        engine
            .set_thresholds(Thresholds {
                temperature: ThresholdPair::new(20, 105),
                ..Default::default()
            })
            .unwrap();
        engine.ingest(&words(3700, 800));
        assert_eq!(engine.ic_temperature_status(), TemperatureStatus::Normal);
        let mut frame = words(3700, 800);
        frame[protocol::IC_TEMPERATURE] = 1100;
        engine.ingest(&frame);
        assert_eq!(
            engine.ic_temperature_status(),
            TemperatureStatus::Overtemperature
        );
        assert_eq!(engine.live_values().ic_temperature, 110.0);
    }

    #[test]
    fn pack_threshold_follows_cell_threshold() {
        let mut engine = TelemetryStateEngine::default();
        engine
            .set_thresholds(Thresholds {
                voltage: ThresholdPair::new(3000, 4200),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            engine.pack_voltage_threshold(),
            ThresholdPair::new(42000, 58800)
        );

        // 14 x 3.0 V sits on the pack minimum, 1 mV less trips it
        let mut frame = words(3100, 800);
        frame[protocol::PACK_VOLTAGE] = 41_999_000;
        engine.ingest(&frame);
        assert_eq!(engine.pack_voltage_status(), VoltageStatus::Undervoltage);
        assert_eq!(engine.cell_voltage_status(1), Some(VoltageStatus::Normal));
    }

    #[test]
    fn invalid_thresholds_keep_previous() {
        let mut engine = TelemetryStateEngine::default();
        let before = *engine.thresholds();
        let result = engine.set_thresholds(Thresholds {
            voltage: ThresholdPair::new(4300, 2800),
            ..Default::default()
        });
        assert!(matches!(result, Err(Error::ThresholdError { .. })));
        assert_eq!(*engine.thresholds(), before);
        assert_eq!(engine.pack_voltage_threshold(), before.pack_voltage());
    }

    #[test]
    fn current_uses_magnitude() {
        let mut engine = TelemetryStateEngine::default();
        engine.ingest(&words(3700, -1700));
        assert_eq!(engine.pack_current_status(), CurrentStatus::Overcurrent);
        assert_eq!(engine.live_values().pack_current, -1700.0);

        let mut engine = TelemetryStateEngine::default();
        engine
            .set_thresholds(Thresholds {
                current: ThresholdPair::new(100, 1600),
                ..Default::default()
            })
            .unwrap();
        engine.ingest(&words(3700, -50));
        assert_eq!(engine.pack_current_status(), CurrentStatus::Undercurrent);
    }

    #[test]
    fn cell_current_mirrors_pack() {
        let mut engine = TelemetryStateEngine::default();
        engine.ingest(&words(3700, 2000));
        for cell in 1..=CELL_COUNT {
            assert_eq!(
                engine.cell_current_status(cell),
                Some(CurrentStatus::Overcurrent)
            );
        }
        assert_eq!(engine.cell_current_status(0), None);
        assert_eq!(engine.cell_current_status(15), None);

        engine.ingest(&words(3700, 800));
        let snapshot = engine.snapshot();
        assert!(snapshot
            .cell_current_status
            .iter()
            .all(|s| *s == CurrentStatus::Overcurrent));
        // one latch serves all cells
        assert_eq!(engine.latched_channels(), vec![Channel::PackCurrent]);

        engine.reset_status();
        assert!(engine
            .snapshot()
            .cell_current_status
            .iter()
            .all(|s| *s == CurrentStatus::Normal));
    }

    #[test]
    fn all_zero_basic_frame() {
        let mut engine = TelemetryStateEngine::default();
        let decoded = protocol::decode(&[0u8; 64]).unwrap();
        assert_eq!(decoded, vec![0; 16]);
        engine.ingest(&decoded);

        assert_eq!(engine.pack_voltage_status(), VoltageStatus::Undervoltage);
        for cell in 1..=CELL_COUNT {
            assert_eq!(
                engine.cell_voltage_status(cell),
                Some(VoltageStatus::Undervoltage)
            );
        }
        // 0 °C is below the 20 °C minimum
        assert_eq!(
            engine.ic_temperature_status(),
            TemperatureStatus::Undertemperature
        );
        // the basic revision carries no current word
        assert_eq!(engine.pack_current_status(), CurrentStatus::Normal);
        assert!(!engine.is_latched(Channel::PackCurrent));

        engine.reset_status();
        let snapshot = engine.snapshot();
        assert!(!snapshot.has_fault());
        assert_eq!(snapshot.values, LiveValues::default());
    }

    #[test]
    fn basic_frame_keeps_current() {
        let mut engine = TelemetryStateEngine::default();
        engine.ingest(&words(3700, 900));
        let mut basic = words(3700, 0);
        basic.truncate(16);
        engine.ingest(&basic);
        assert_eq!(engine.live_values().pack_current, 900.0);
    }

    #[test]
    fn short_array_is_ignored() {
        let mut engine = TelemetryStateEngine::default();
        engine.ingest(&[1_000_000; 10]);
        assert_eq!(*engine.live_values(), LiveValues::default());
        assert!(engine.latched_channels().is_empty());
    }

    #[test]
    fn odd_length_array_uses_shared_channels() {
        let mut engine = TelemetryStateEngine::default();
        let mut frame = words(3700, 700);
        frame.truncate(20);
        engine.ingest(&frame);
        assert_eq!(engine.live_values().cell_voltages[0], 3700.0);
        assert_eq!(engine.live_values().pack_current, 700.0);
    }

    #[test]
    fn clear_data_keeps_latches() {
        let mut engine = TelemetryStateEngine::default();
        engine.ingest(&words(4500, 800));
        engine.clear_data();
        assert_eq!(*engine.live_values(), LiveValues::default());
        assert_eq!(engine.pack_voltage_status(), VoltageStatus::Overvoltage);
        assert!(engine.is_latched(Channel::CellVoltage(14)));
    }

    #[test]
    fn state_estimation_and_balancing_values() {
        let mut all = words(3700, 800);
        for cell in 0..CELL_COUNT {
            all[protocol::STATE_OF_CHARGE + cell] = 500 + cell as i64;
            all[protocol::STATE_OF_HEALTH + cell] = 990;
        }
        all[protocol::EQUIVALENT_FULL_CYCLE] = 12;
        all.extend((0..CELL_COUNT).map(|cell| (cell % 2) as i64));
        let frame = encode(&all).unwrap();
        assert_eq!(frame.len(), 240);

        let mut engine = TelemetryStateEngine::default();
        engine.ingest_telemetry(&Telemetry::decode(&frame).unwrap());
        let values = engine.live_values();
        assert_eq!(values.state_of_charge[3], 503);
        assert_eq!(values.state_of_health[13], 990);
        assert_eq!(values.equivalent_full_cycles, 12);
        assert!(!values.balancing[0]);
        assert!(values.balancing[1]);

        engine.clear_data();
        assert_eq!(engine.live_values().equivalent_full_cycles, 0);
    }

    #[test]
    fn finer_voltage_scaling() {
        let mut engine = TelemetryStateEngine::default().with_scaling(Scaling {
            voltage_divisor: 1_000_000.0,
            ..Default::default()
        });
        engine
            .set_thresholds(Thresholds {
                voltage: ThresholdPair::new(3, 4),
                ..Default::default()
            })
            .unwrap();
        let mut frame = words(3700, 800);
        frame[protocol::PACK_VOLTAGE] = 3_700_000 * 14;
        engine.ingest(&frame);
        assert_eq!(engine.live_values().cell_voltages[0], 3.7);
        assert_eq!(engine.pack_voltage_status(), VoltageStatus::Normal);
    }

    #[test]
    fn snapshot_names() {
        let mut engine = TelemetryStateEngine::default();
        engine.ingest(&words(3700, 800));
        let snapshot = engine.snapshot();
        let values = snapshot.named_values();
        assert_eq!(values.len(), 4 + 4 * CELL_COUNT);
        assert_eq!(values[1], ("cellVoltage_1".to_string(), 3700.0));
        assert!(values.contains(&("packCurrent".to_string(), 800.0)));
        assert!(values.iter().any(|(name, _)| name == "cellCB_14"));
        assert!(values.iter().any(|(name, _)| name == "equivalentFullCycle"));
        let statuses = snapshot.named_statuses();
        assert_eq!(
            statuses[0],
            ("packVoltageStatus".to_string(), "NORMAL".to_string())
        );
        assert_eq!(statuses.len(), 3 + 2 * CELL_COUNT);
    }

    #[test]
    fn parse_commands() {
        assert_eq!(
            "reset".parse::<EngineCommand>().unwrap(),
            EngineCommand::ResetStatus
        );
        assert_eq!(
            " CLEAR\n".parse::<EngineCommand>().unwrap(),
            EngineCommand::ClearData
        );
        assert!(matches!(
            "open".parse::<EngineCommand>(),
            Err(Error::CommandError(cmd)) if cmd == "open"
        ));
    }

    #[test]
    fn apply_commands() {
        let mut engine = TelemetryStateEngine::default();
        engine.ingest(&words(4400, 800));
        assert!(engine.is_latched(Channel::CellVoltage(1)));

        engine.apply(EngineCommand::ResetStatus).unwrap();
        assert!(engine.latched_channels().is_empty());
        assert_eq!(engine.live_values().cell_voltages[0], 4400.0);

        engine.apply(EngineCommand::ClearData).unwrap();
        assert_eq!(engine.live_values().cell_voltages[0], 0.0);

        let inverted = Thresholds {
            current: ThresholdPair::new(10, 0),
            ..Default::default()
        };
        let command = EngineCommand::SetThresholds(inverted);
        assert!(engine.apply(command).is_err());
        assert_eq!(engine.thresholds(), &Thresholds::default());
    }
}
