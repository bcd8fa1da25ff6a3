use anyhow::{bail, Context, Result};
use bccmon_lib::framer::FrameAccumulator;
use bccmon_lib::protocol::ProtocolRevision;
use bccmon_lib::serialport::{BccMonitor, SerialSettings};
use bccmon_lib::telemetry::Telemetry;
use bccmon_lib::TelemetryStateEngine;
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{ops::Deref, panic, path::Path};

mod commandline;
mod config;
mod daemon;
mod mqtt;

use commandline::{CliArgs, CliCommands};

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn print_latched(engine: &TelemetryStateEngine) {
    let latched = engine.latched_channels();
    if latched.is_empty() {
        println!("Latched: none");
    } else {
        let names: Vec<String> = latched.iter().map(ToString::to_string).collect();
        println!("Latched: {}", names.join(", "));
    }
}

fn open_monitor(args: &CliArgs, revision: ProtocolRevision) -> Result<BccMonitor> {
    let settings = SerialSettings {
        baud_rate: args.baud_rate,
        data_bits: args.data_bits.into(),
        parity: args.parity.into(),
        stop_bits: args.stop_bits.into(),
        timeout: args.timeout,
    };
    BccMonitor::new(&args.device, &settings, revision)
        .with_context(|| format!("Cannot open serial port '{}'", args.device))
}

fn decode_hex(engine: &mut TelemetryStateEngine, hex_frame: &str) -> Result<()> {
    let compact: String = hex_frame.split_whitespace().collect();
    let rx_buffer = hex::decode(&compact).with_context(|| "Cannot parse hex frame")?;
    let telemetry = Telemetry::decode(&rx_buffer).with_context(|| "Cannot decode frame")?;
    info!("Decoded {} frame", telemetry.revision);
    engine.ingest_telemetry(&telemetry);
    Ok(())
}

fn replay(
    engine: &mut TelemetryStateEngine,
    revision: ProtocolRevision,
    file: &Path,
    chunk: usize,
) -> Result<()> {
    if chunk == 0 {
        bail!("Chunk size must be at least one byte");
    }
    let capture =
        std::fs::read(file).with_context(|| format!("Cannot read capture file {file:?}"))?;
    let mut framer = FrameAccumulator::for_revision(revision);
    let (mut ingested, mut dropped) = (0usize, 0usize);
    for rx_buffer in capture.chunks(chunk) {
        for frame in framer.push(rx_buffer) {
            match Telemetry::decode(&frame) {
                Ok(telemetry) => {
                    engine.ingest_telemetry(&telemetry);
                    ingested += 1;
                }
                Err(e) => {
                    warn!("Dropping frame: {e}");
                    dropped += 1;
                }
            }
        }
    }
    let trailing = framer.discard_partial();
    println!(
        "Replayed {} bytes: {ingested} frames ingested, {dropped} dropped",
        capture.len()
    );
    println!("Trailing partial frame: {trailing} bytes");
    Ok(())
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let revision = ProtocolRevision::from(args.revision);
    let monitor_config = config::MonitorConfig::load_or_default(args.config.as_deref())?;
    let mut engine = monitor_config.build_engine(revision)?;

    match &args.command {
        CliCommands::Decode { hex } => {
            decode_hex(&mut engine, hex)?;
            daemon::print_snapshot(&engine.snapshot());
            print_latched(&engine);
        }
        CliCommands::Replay { file, chunk } => {
            replay(&mut engine, revision, file, *chunk)?;
            daemon::print_snapshot(&engine.snapshot());
            print_latched(&engine);
        }
        CliCommands::Snapshot { wait } => {
            let mut monitor = open_monitor(&args, revision)?;
            let Some(telemetry) = monitor
                .wait_frame(*wait)
                .with_context(|| "Cannot read telemetry")?
            else {
                bail!("No complete {revision} frame received within {wait:?}");
            };
            engine.ingest_telemetry(&telemetry);
            daemon::print_snapshot(&engine.snapshot());
            print_latched(&engine);
        }
        CliCommands::Thresholds => {
            let thresholds = engine.thresholds();
            println!("Cell voltage: {} mV", thresholds.voltage);
            println!("Pack voltage: {} mV", engine.pack_voltage_threshold());
            println!("Current: {} mA", thresholds.current);
            println!("IC temperature: {} °C", thresholds.temperature);
            let scaling = engine.scaling();
            println!(
                "Divisors: voltage={} temperature={} current={}",
                scaling.voltage_divisor, scaling.temperature_divisor, scaling.current_divisor
            );
        }
        CliCommands::Daemon { output, interval } => {
            let monitor = open_monitor(&args, revision)?;
            daemon::run(monitor, engine, output.clone(), *interval)?;
        }
    }

    Ok(())
}
