//! Synchronous BCC telemetry reader using the `serialport` crate.
//!
//! The firmware streams frames on its own, so there is no request/response cycle:
//! [`BccMonitor::poll`] drains whatever is pending, reassembles frames and decodes them.

use crate::engine::TelemetryStateEngine;
use crate::framer::FrameAccumulator;
use crate::protocol::ProtocolRevision;
use crate::telemetry::Telemetry;
use std::collections::VecDeque;
use std::io::Read;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Cannot open serial port '{port}': {source}")]
    Open {
        port: String,
        source: serialport::Error,
    },
    #[error("Serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// UART line settings. The BCC board defaults to 115200 8N1.
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: serialport::DataBits,
    pub parity: serialport::Parity,
    pub stop_bits: serialport::StopBits,
    pub timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: serialport::DataBits::Eight,
            parity: serialport::Parity::None,
            stop_bits: serialport::StopBits::One,
            timeout: Duration::from_millis(100),
        }
    }
}

#[derive(Debug)]
pub struct BccMonitor {
    serial: Box<dyn serialport::SerialPort>,
    framer: FrameAccumulator,
    ready: VecDeque<Telemetry>,
}

impl BccMonitor {
    pub fn new(port: &str, settings: &SerialSettings, revision: ProtocolRevision) -> Result<Self> {
        let serial = serialport::new(port, settings.baud_rate)
            .data_bits(settings.data_bits)
            .parity(settings.parity)
            .stop_bits(settings.stop_bits)
            .flow_control(serialport::FlowControl::None)
            .timeout(settings.timeout)
            .open()
            .map_err(|source| Error::Open {
                port: port.to_string(),
                source,
            })?;
        log::debug!("Opened {port} with {settings:?}, expecting {revision} frames");
        Ok(Self::from_port(serial, revision))
    }

    /// Wraps an already opened port.
    pub fn from_port(serial: Box<dyn serialport::SerialPort>, revision: ProtocolRevision) -> Self {
        Self {
            serial,
            framer: FrameAccumulator::for_revision(revision),
            ready: VecDeque::new(),
        }
    }

    pub fn set_idle_gap(&mut self, idle_gap: Duration) {
        self.framer.set_idle_gap(idle_gap);
    }

    /// Reads pending bytes without blocking and returns every frame completed so far, oldest first.
    pub fn poll(&mut self) -> Result<Vec<Telemetry>> {
        self.receive()?;
        Ok(self.ready.drain(..).collect())
    }

    fn receive(&mut self) -> Result<()> {
        let pending = self.serial.bytes_to_read()? as usize;
        if pending == 0 {
            self.framer.expire(Instant::now());
            return Ok(());
        }

        let mut rx_buffer = vec![0; pending];
        let received = self.serial.read(&mut rx_buffer)?;
        rx_buffer.truncate(received);
        log::trace!("receive_bytes: {rx_buffer:02X?}");

        for frame in self.framer.push_at(&rx_buffer, Instant::now()) {
            match Telemetry::decode(&frame) {
                Ok(telemetry) => self.ready.push_back(telemetry),
                Err(err) => log::warn!("Dropping frame: {err}"),
            }
        }
        Ok(())
    }

    /// Polls once and feeds every completed frame into `engine`.
    /// Returns the number of frames ingested.
    pub fn poll_into(&mut self, engine: &mut TelemetryStateEngine) -> Result<usize> {
        let frames = self.poll()?;
        for telemetry in &frames {
            engine.ingest_telemetry(telemetry);
        }
        Ok(frames.len())
    }

    /// Blocks until one complete frame arrives or `timeout` elapses.
    ///
    /// Frames completed by the same read are queued and returned by later calls.
    pub fn wait_frame(&mut self, timeout: Duration) -> Result<Option<Telemetry>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(telemetry) = self.ready.pop_front() {
                return Ok(Some(telemetry));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            self.receive()?;
            if self.ready.is_empty() {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
}
