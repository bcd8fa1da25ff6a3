use anyhow::{Context, Result};
use bccmon_lib::serialport::BccMonitor;
use bccmon_lib::{EngineCommand, Snapshot, TelemetryStateEngine};
use log::{error, info, warn};
use serde_json::json;
use std::io::BufRead;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::{commandline, mqtt};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Prints measurements and statuses as a table, one row per cell.
pub fn print_snapshot(snapshot: &Snapshot) {
    let values = &snapshot.values;
    println!(
        "Pack voltage: {:.1} mV [{}]",
        values.pack_voltage, snapshot.pack_voltage_status
    );
    println!(
        "Pack current: {:.0} mA [{}]",
        values.pack_current, snapshot.pack_current_status
    );
    println!(
        "IC temperature: {:.1} °C [{}]",
        values.ic_temperature, snapshot.ic_temperature_status
    );
    println!("Equivalent full cycles: {}", values.equivalent_full_cycles);
    println!("Cell  Voltage[mV]  Status        SoC[‰]  SoH[‰]  CB");
    for i in 0..values.cell_voltages.len() {
        println!(
            "{:>4}  {:>11.1}  {:<12}  {:>6}  {:>6}  {}",
            i + 1,
            values.cell_voltages[i],
            snapshot.cell_voltage_status[i].to_string(),
            values.state_of_charge[i],
            values.state_of_health[i],
            if values.balancing[i] { "on" } else { "off" }
        );
    }
}

fn snapshot_to_json(snapshot: &Snapshot, engine: &TelemetryStateEngine) -> serde_json::Value {
    let values: serde_json::Map<String, serde_json::Value> = snapshot
        .named_values()
        .into_iter()
        .map(|(name, value)| (name, json!(value)))
        .collect();
    let statuses: serde_json::Map<String, serde_json::Value> = snapshot
        .named_statuses()
        .into_iter()
        .map(|(name, status)| (name, json!(status)))
        .collect();
    let latched: Vec<String> = engine
        .latched_channels()
        .iter()
        .map(ToString::to_string)
        .collect();
    json!({
        "values": values,
        "status": statuses,
        "latched": latched,
        "fault": snapshot.has_fault(),
    })
}

fn publish_simple_format(
    publisher: &mut mqtt::MqttPublisher,
    base_topic: &str,
    group_name: &str,
    value: &serde_json::Value,
) {
    fn publish_recursive(
        publisher: &mut mqtt::MqttPublisher,
        topic: &str,
        val: &serde_json::Value,
    ) {
        match val {
            serde_json::Value::Object(map) => {
                for (k, v) in map {
                    let sub_topic = format!("{topic}/{k}");
                    publish_recursive(publisher, &sub_topic, v);
                }
            }
            serde_json::Value::Array(arr) => {
                for (i, v) in arr.iter().enumerate() {
                    let sub_topic = format!("{topic}/{i}");
                    publish_recursive(publisher, &sub_topic, v);
                }
            }
            serde_json::Value::String(s) => {
                if let Err(e) = publisher.publish(topic, s) {
                    error!("Failed to publish message to topic {topic}: {e}");
                }
            }
            serde_json::Value::Number(n) => {
                if let Err(e) = publisher.publish(topic, &n.to_string()) {
                    error!("Failed to publish message to topic {topic}: {e}");
                }
            }
            serde_json::Value::Bool(b) => {
                if let Err(e) = publisher.publish(topic, &b.to_string()) {
                    error!("Failed to publish message to topic {topic}: {e}");
                }
            }
            serde_json::Value::Null => {}
        }
    }
    let root_topic = format!("{base_topic}/{group_name}");
    publish_recursive(publisher, &root_topic, value);
}

fn output_snapshot(
    output: &commandline::DaemonOutput,
    publisher: Option<&mut mqtt::MqttPublisher>,
    engine: &TelemetryStateEngine,
) {
    let snapshot = engine.snapshot();
    match output {
        commandline::DaemonOutput::Console => {
            println!("--- Data at {} ---", chrono::Local::now().to_rfc3339());
            print_snapshot(&snapshot);
            let latched = engine.latched_channels();
            if !latched.is_empty() {
                let names: Vec<String> = latched.iter().map(ToString::to_string).collect();
                println!("Latched: {}", names.join(", "));
            }
            println!("--------------------------");
        }
        commandline::DaemonOutput::Mqtt { format, .. } => {
            let Some(publisher) = publisher else {
                warn!("MQTT output selected, but publisher is not initialized. Skipping publish.");
                return;
            };
            let data = snapshot_to_json(&snapshot, engine);
            let base_topic = publisher.topic().to_string();
            match format {
                commandline::MqttFormat::Json => {
                    let mut data_to_publish = serde_json::Map::new();
                    data_to_publish.insert(
                        "timestamp".to_string(),
                        json!(chrono::Utc::now().to_rfc3339()),
                    );
                    if let serde_json::Value::Object(map) = data {
                        data_to_publish.extend(map);
                    }
                    match serde_json::to_string(&data_to_publish) {
                        Ok(json_payload) => {
                            if let Err(e) = publisher.publish(&base_topic, &json_payload) {
                                error!("Failed to publish data to MQTT: {e:?}");
                            } else {
                                info!("Successfully published data to MQTT.");
                            }
                        }
                        Err(e) => error!("Failed to serialize data to JSON string: {e}"),
                    }
                }
                commandline::MqttFormat::Simple => {
                    if let serde_json::Value::Object(map) = &data {
                        for (name, value) in map {
                            publish_simple_format(publisher, &base_topic, name, value);
                        }
                    }
                }
            }
        }
    }
}

/// Forwards `reset` and `clear` lines typed on the console.
fn spawn_stdin_commands(commands: mpsc::Sender<EngineCommand>) -> Result<()> {
    std::thread::Builder::new()
        .name("stdin-commands".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<EngineCommand>() {
                    Ok(command) => {
                        if commands.send(command).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("{e}, expected 'reset' or 'clear'"),
                }
            }
        })
        .with_context(|| "Cannot spawn console command thread")?;
    Ok(())
}

/// Applies every queued command. Returns how many were applied.
fn apply_pending(
    engine: &mut TelemetryStateEngine,
    commands: &mpsc::Receiver<EngineCommand>,
) -> usize {
    let mut applied = 0;
    while let Ok(command) = commands.try_recv() {
        match engine.apply(command) {
            Ok(()) => applied += 1,
            Err(e) => error!("Cannot apply command: {e}"),
        }
    }
    applied
}

pub fn run(
    mut monitor: BccMonitor,
    mut engine: TelemetryStateEngine,
    output: commandline::DaemonOutput,
    interval: Duration,
) -> Result<()> {
    info!("Starting daemon mode: output={output:?}, interval={interval:?}");

    let (command_tx, command_rx) = mpsc::channel();
    let mut mqtt_publisher: Option<mqtt::MqttPublisher> = None;

    match &output {
        commandline::DaemonOutput::Console => {
            spawn_stdin_commands(command_tx)?;
            info!("Type 'reset' to unlatch all channels or 'clear' to zero the live values");
        }
        commandline::DaemonOutput::Mqtt { config_file, .. } => {
            let config = mqtt::MqttConfig::load(config_file)
                .with_context(|| format!("Failed to open MQTT config file at '{config_file}'"))?;
            info!("Successfully loaded MQTT config from {config_file}: {config:?}");
            let command_topic = config.command_topic();
            let publisher = mqtt::MqttPublisher::new(config, Some(command_tx))
                .with_context(|| "Failed to create MQTT publisher")?;
            info!("MQTT Publisher created successfully, accepting commands on {command_topic}");
            mqtt_publisher = Some(publisher);
        }
    }

    let mut last_output = Instant::now();
    let mut frames_since_output = 0;
    loop {
        let commands_applied = apply_pending(&mut engine, &command_rx);
        frames_since_output += monitor
            .poll_into(&mut engine)
            .with_context(|| "Serial port unavailable")?;

        if commands_applied > 0 || last_output.elapsed() >= interval {
            if commands_applied == 0 && frames_since_output == 0 {
                warn!("No telemetry received in the last {interval:?}");
            }
            output_snapshot(&output, mqtt_publisher.as_mut(), &engine);
            frames_since_output = 0;
            last_output = Instant::now();
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
