use crate::mqtt;
use bccmon_lib::protocol::ProtocolRevision;
use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::PathBuf;
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Decode one hex encoded frame (e.g. captured with a terminal program) and show its status
    Decode {
        /// Frame bytes as hex, whitespace is ignored
        hex: String,
    },
    /// Feed a binary capture of the serial line through the decoder and status engine
    Replay {
        /// Capture file containing raw bytes as received from the BCC board
        file: PathBuf,
        /// Size of the simulated serial reads in bytes
        #[arg(long, default_value_t = 64)]
        chunk: usize,
    },
    /// Wait for one frame on the serial port and show it
    Snapshot {
        /// How long to wait for a complete frame (e.g., "2s", "500ms")
        #[arg(value_parser = humantime::parse_duration, long, default_value = "5s")]
        wait: Duration,
    },
    /// Show the active thresholds including the derived pack voltage limits
    Thresholds,
    /// Run in daemon mode, continuously reading frames and periodically outputting the status
    Daemon {
        /// Output destination
        #[command(subcommand)]
        output: DaemonOutput,
        /// Interval for outputting the status (e.g., "1s", "1m")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "1s")]
        interval: Duration,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, PartialEq)]
pub enum MqttFormat {
    Simple,
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Continuously print the status to the standard output (console).
    Console,
    /// Continuously publish the status to an MQTT broker.
    Mqtt {
        /// The configuration file for the MQTT broker
        #[arg(long, default_value_t = mqtt::MqttConfig::DEFAULT_CONFIG_FILE.to_string())]
        config_file: String,
        /// Output format for MQTT messages
        #[arg(long, value_enum, default_value_t = MqttFormat::Simple)]
        format: MqttFormat,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum Revision {
    /// 64 byte frames: pack, cells and IC temperature
    Basic,
    /// 184 byte frames: adds current, SoC, SoH and equivalent full cycles
    StateEstimation,
    /// 240 byte frames: adds cell balancing indicators
    Balancing,
}

impl From<Revision> for ProtocolRevision {
    fn from(revision: Revision) -> Self {
        match revision {
            Revision::Basic => ProtocolRevision::Basic,
            Revision::StateEstimation => ProtocolRevision::StateEstimation,
            Revision::Balancing => ProtocolRevision::Balancing,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum DataBits {
    #[value(name = "5")]
    Five,
    #[value(name = "6")]
    Six,
    #[value(name = "7")]
    Seven,
    #[value(name = "8")]
    Eight,
}

impl From<DataBits> for serialport::DataBits {
    fn from(data_bits: DataBits) -> Self {
        match data_bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum StopBits {
    #[value(name = "1")]
    One,
    #[value(name = "2")]
    Two,
}

impl From<StopBits> for serialport::StopBits {
    fn from(stop_bits: StopBits) -> Self {
        match stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

const fn about_text() -> &'static str {
    "MC33771C battery cell controller monitor"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Serial port device path (e.g., /dev/ttyUSB0 on Linux, COM1 on Windows)
    #[arg(short, long, default_value_t = default_device_name())]
    pub device: String,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Serial baud rate (1200 - 921600)
    #[arg(short, long, default_value_t = 115_200)]
    pub baud_rate: u32,

    #[arg(long, value_enum, default_value_t = Parity::None)]
    pub parity: Parity,

    #[arg(long, value_enum, default_value_t = DataBits::Eight)]
    pub data_bits: DataBits,

    #[arg(long, value_enum, default_value_t = StopBits::One)]
    pub stop_bits: StopBits,

    /// Timeout for serial I/O operations (e.g., "100ms", "1s", "2s 500ms")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "100ms")]
    pub timeout: Duration,

    /// Firmware revision, selects the expected frame length
    #[arg(short, long, value_enum, default_value_t = Revision::Balancing)]
    pub revision: Revision,

    /// Monitor configuration file with thresholds and scaling (YAML)
    #[arg(short, long)]
    pub config: Option<String>,
}
