use anyhow::{bail, Context, Result};
use bccmon_lib::protocol::{ProtocolRevision, Scaling};
use bccmon_lib::status::Thresholds;
use bccmon_lib::TelemetryStateEngine;
use serde::Deserialize;
use std::path::Path;

/// Thresholds and unit overrides for the status engine.
///
/// ```yaml
/// thresholds:
///   voltage: { min: 2800, max: 4300 }
///   current: { min: 0, max: 1600 }
///   temperature: { min: 20, max: 105 }
/// voltage_divisor: 1000000
/// ```
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub thresholds: Thresholds,
    pub voltage_divisor: Option<f64>,
    pub temperature_divisor: Option<f64>,
}

impl MonitorConfig {
    pub const DEFAULT_CONFIG_FILE: &str = "bccmon.yaml";

    pub fn load(config_file_path: &str) -> Result<Self> {
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open monitor config file {config_file_path:?}"))?;
        let config: Self = serde_yaml::from_reader(&config_file).with_context(|| {
            format!("Cannot read monitor config from file: {config_file_path:?}")
        })?;
        Ok(config)
    }

    /// Loads the given file, or [`Self::DEFAULT_CONFIG_FILE`] when it exists, or the defaults.
    pub fn load_or_default(config_file_path: Option<&str>) -> Result<Self> {
        match config_file_path {
            Some(path) => Self::load(path),
            None if Path::new(Self::DEFAULT_CONFIG_FILE).exists() => {
                Self::load(Self::DEFAULT_CONFIG_FILE)
            }
            None => {
                log::debug!("No monitor config file, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn scaling(&self, revision: ProtocolRevision) -> Scaling {
        let mut scaling = revision.scaling();
        if let Some(divisor) = self.voltage_divisor {
            scaling.voltage_divisor = divisor;
        }
        if let Some(divisor) = self.temperature_divisor {
            scaling.temperature_divisor = divisor;
        }
        scaling
    }

    pub fn build_engine(&self, revision: ProtocolRevision) -> Result<TelemetryStateEngine> {
        for divisor in [self.voltage_divisor, self.temperature_divisor]
            .into_iter()
            .flatten()
        {
            if !divisor.is_normal() {
                bail!("Invalid divisor {divisor} in monitor config");
            }
        }
        let scaling = self.scaling(revision);
        let mut engine = TelemetryStateEngine::default().with_scaling(scaling);
        engine
            .set_thresholds(self.thresholds)
            .with_context(|| "Invalid thresholds in monitor config")?;
        Ok(engine)
    }
}
