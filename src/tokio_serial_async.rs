//! Asynchronous BCC telemetry stream built on Tokio and `tokio-serial`.
//!
//! [`BccStream::run`] is meant to be spawned as a background task. It owns the
//! [`TelemetryStateEngine`] and publishes a fresh [`Snapshot`] after every frame and
//! every applied [`EngineCommand`] through a `watch` channel, so display code never
//! sees a half updated frame. Commands take effect even while the line is quiet.
//!
//! # Example
//!
//! ```no_run
//! use bccmon_lib::engine::{Snapshot, TelemetryStateEngine};
//! use bccmon_lib::protocol::ProtocolRevision;
//! use bccmon_lib::tokio_serial_async::{BccStream, Error, SerialSettings};
//! use tokio::sync::{mpsc, watch};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let stream = BccStream::open(
//!         "/dev/ttyUSB0",
//!         &SerialSettings::default(),
//!         ProtocolRevision::Balancing,
//!     )?;
//!     let (snapshot_tx, mut snapshot_rx) = watch::channel(Snapshot::default());
//!     let (_command_tx, command_rx) = mpsc::unbounded_channel();
//!     tokio::spawn(stream.run(TelemetryStateEngine::default(), snapshot_tx, command_rx));
//!
//!     while snapshot_rx.changed().await.is_ok() {
//!         println!("{:?}", snapshot_rx.borrow().pack_voltage_status);
//!     }
//!     Ok(())
//! }
//! ```

pub use crate::engine::EngineCommand;
use crate::engine::{Snapshot, TelemetryStateEngine};
use crate::framer::FrameAccumulator;
use crate::protocol::ProtocolRevision;
use crate::telemetry::Telemetry;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch};
use tokio_serial::SerialPortBuilderExt;

/// Errors specific to the asynchronous Tokio serial port reader.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The line reached end of file, typically because the device went away.
    #[error("Serial stream closed")]
    Closed,
    #[error("BCC error: {0}")]
    BccError(#[from] crate::Error),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Tokio serial error: {0}")]
    TokioSerial(#[from] tokio_serial::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// UART line settings for [`BccStream::open`].
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: tokio_serial::DataBits,
    pub parity: tokio_serial::Parity,
    pub stop_bits: tokio_serial::StopBits,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: tokio_serial::DataBits::Eight,
            parity: tokio_serial::Parity::None,
            stop_bits: tokio_serial::StopBits::One,
        }
    }
}

#[derive(Debug)]
pub struct BccStream<R = tokio_serial::SerialStream> {
    reader: R,
    framer: FrameAccumulator,
    ready: VecDeque<Telemetry>,
}

impl BccStream<tokio_serial::SerialStream> {
    /// Opens `port` for asynchronous reading.
    pub fn open(port: &str, settings: &SerialSettings, revision: ProtocolRevision) -> Result<Self> {
        let serial = tokio_serial::new(port, settings.baud_rate)
            .data_bits(settings.data_bits)
            .parity(settings.parity)
            .stop_bits(settings.stop_bits)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()?;
        Ok(Self::from_reader(serial, revision))
    }
}

impl<R: AsyncRead + Unpin> BccStream<R> {
    pub fn from_reader(reader: R, revision: ProtocolRevision) -> Self {
        Self {
            reader,
            framer: FrameAccumulator::for_revision(revision),
            ready: VecDeque::new(),
        }
    }

    /// Sets how long the line may stay quiet before a partial frame is dropped.
    pub fn set_idle_gap(&mut self, idle_gap: Duration) {
        self.framer.set_idle_gap(idle_gap);
    }

    /// Waits for the next frame that decodes. Malformed frames are logged and skipped.
    ///
    /// Cancel safe: received bytes and completed frames stay buffered in `self`.
    pub async fn next_frame(&mut self) -> Result<Telemetry> {
        let mut rx_buffer = vec![0u8; self.framer.frame_len()];
        loop {
            if let Some(telemetry) = self.ready.pop_front() {
                return Ok(telemetry);
            }
            let read = self.reader.read(&mut rx_buffer);
            let received = match tokio::time::timeout(self.framer.idle_gap(), read).await {
                Ok(received) => received?,
                Err(_) => {
                    self.framer.expire(Instant::now());
                    continue;
                }
            };
            if received == 0 {
                return Err(Error::Closed);
            }
            log::trace!("receive_bytes: {:02X?}", &rx_buffer[..received]);

            for frame in self.framer.push_at(&rx_buffer[..received], Instant::now()) {
                match Telemetry::decode(&frame) {
                    Ok(telemetry) => self.ready.push_back(telemetry),
                    Err(err) => log::warn!("Dropping frame: {err}"),
                }
            }
        }
    }

    /// Ingests frames into `engine` and applies commands as they arrive, publishing a
    /// snapshot after each. Pending commands are applied before the next frame.
    ///
    /// Returns when the line closes, or with an error when reading fails.
    pub async fn run(
        mut self,
        mut engine: TelemetryStateEngine,
        snapshots: watch::Sender<Snapshot>,
        mut commands: mpsc::UnboundedReceiver<EngineCommand>,
    ) -> Result<()> {
        snapshots.send_replace(engine.snapshot());
        let mut commands_open = true;
        loop {
            tokio::select! {
                biased;
                command = commands.recv(), if commands_open => match command {
                    Some(command) => apply_command(&mut engine, command),
                    None => {
                        log::debug!("Command channel closed");
                        commands_open = false;
                        continue;
                    }
                },
                frame = self.next_frame() => match frame {
                    Ok(telemetry) => engine.ingest_telemetry(&telemetry),
                    Err(Error::Closed) => {
                        log::info!("Serial stream closed, stopping");
                        return Ok(());
                    }
                    Err(err) => return Err(err),
                },
            }
            snapshots.send_replace(engine.snapshot());
        }
    }
}

fn apply_command(engine: &mut TelemetryStateEngine, command: EngineCommand) {
    if let Err(err) = engine.apply(command) {
        log::error!("Cannot apply command: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{self, CELL_COUNT};
    use crate::status::{ThresholdPair, Thresholds, VoltageStatus};
    use tokio::io::AsyncWriteExt;

    fn basic_frame(cell_mv: i64) -> Vec<u8> {
        let mut words = vec![0i64; ProtocolRevision::Basic.word_count()];
        words[protocol::PACK_VOLTAGE] = cell_mv * 1000 * CELL_COUNT as i64;
        for cell in 0..CELL_COUNT {
            words[protocol::CELL_VOLTAGE + cell] = cell_mv * 1000;
        }
        words[protocol::IC_TEMPERATURE] = 300;
        protocol::encode(&words).unwrap()
    }

    async fn wait_until(
        snapshot_rx: &mut watch::Receiver<Snapshot>,
        condition: impl FnMut(&Snapshot) -> bool,
    ) {
        let changed = snapshot_rx.wait_for(condition);
        tokio::time::timeout(Duration::from_secs(1), changed)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn next_frame_from_split_writes() {
        let (mut tx, rx) = tokio::io::duplex(1024);
        let mut stream = BccStream::from_reader(rx, ProtocolRevision::Basic);
        let frame = basic_frame(3700);
        tx.write_all(&frame[..30]).await.unwrap();
        tx.write_all(&frame[30..]).await.unwrap();
        let telemetry = stream.next_frame().await.unwrap();
        assert_eq!(telemetry.cell_voltages[0], 3_700_000);
        assert_eq!(telemetry.ic_temperature, 300);
    }

    #[tokio::test]
    async fn partial_frame_dropped_after_idle_gap() {
        let (mut tx, rx) = tokio::io::duplex(1024);
        let mut stream = BccStream::from_reader(rx, ProtocolRevision::Basic);
        stream.set_idle_gap(Duration::from_millis(20));
        tx.write_all(&[0xFF; 7]).await.unwrap();
        let frame = basic_frame(3600);
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            tx.write_all(&frame).await.unwrap();
            tx
        });
        let telemetry = stream.next_frame().await.unwrap();
        assert_eq!(telemetry.cell_voltages[13], 3_600_000);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn closed_line() {
        let (tx, rx) = tokio::io::duplex(64);
        drop(tx);
        let mut stream = BccStream::from_reader(rx, ProtocolRevision::Basic);
        assert!(matches!(stream.next_frame().await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn run_publishes_snapshots_and_applies_commands() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let stream = BccStream::from_reader(rx, ProtocolRevision::Basic);
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let engine = TelemetryStateEngine::default();
        let task = tokio::spawn(stream.run(engine, snapshot_tx, command_rx));

        tx.write_all(&basic_frame(4400)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            snapshot_rx.borrow().cell_voltage_status[0],
            VoltageStatus::Overvoltage
        );

        command_tx.send(EngineCommand::ResetStatus).unwrap();
        command_tx
            .send(EngineCommand::SetThresholds(Thresholds {
                voltage: ThresholdPair::new(2800, 4500),
                ..Default::default()
            }))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.write_all(&basic_frame(4400)).await.unwrap();
        drop(tx);

        task.await.unwrap().unwrap();
        let snapshot = snapshot_rx.borrow();
        assert_eq!(snapshot.cell_voltage_status[0], VoltageStatus::Normal);
        assert_eq!(snapshot.values.cell_voltages[0], 4400.0);
    }

    #[tokio::test]
    async fn commands_apply_while_line_is_quiet() {
        let (mut tx, rx) = tokio::io::duplex(1024);
        let stream = BccStream::from_reader(rx, ProtocolRevision::Basic);
        let (snapshot_tx, mut snapshot_rx) = watch::channel(Snapshot::default());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let engine = TelemetryStateEngine::default();
        let task = tokio::spawn(stream.run(engine, snapshot_tx, command_rx));

        tx.write_all(&basic_frame(4400)).await.unwrap();
        wait_until(&mut snapshot_rx, |s| {
            s.cell_voltage_status[0] == VoltageStatus::Overvoltage
        })
        .await;

        // No further frames: the reset alone must publish a new snapshot
        command_tx.send(EngineCommand::ResetStatus).unwrap();
        wait_until(&mut snapshot_rx, |s| {
            s.cell_voltage_status[0] == VoltageStatus::Normal
        })
        .await;
        assert_eq!(snapshot_rx.borrow().values.cell_voltages[0], 4400.0);

        command_tx.send(EngineCommand::ClearData).unwrap();
        let cleared = |s: &Snapshot| s.values.cell_voltages[0] == 0.0;
        wait_until(&mut snapshot_rx, cleared).await;

        drop(command_tx);
        drop(tx);
        task.await.unwrap().unwrap();
    }
}
