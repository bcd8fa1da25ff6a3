#![cfg_attr(docsrs, feature(doc_cfg))]
//! # bccmon_lib
//!
//! This crate decodes the telemetry stream of an MC33771C battery cell controller
//! monitoring a 14 cell pack, and classifies pack voltage, pack current, IC temperature
//! and every cell voltage against configurable thresholds with sticky fault latching.
//!
//! ## Features
//!
//! The decoder and the status engine have no optional dependencies.
//! Transports are enabled per feature.
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `bccmon` command-line tool and pulls in `serialport` and `serde`.
//!
//! ### Transport Features
//! - `serialport`: Enables the **synchronous** reader using the `serialport` crate.
//! - `tokio-serial-async`: Enables the **asynchronous** reader using `tokio` and `tokio-serial`.
//!
//! ### Utility Features
//! - `serde`: Enables `serde` support for thresholds, telemetry and snapshots.
//! - `bin-dependencies`: Enables all features required by the `bccmon` binary executable.

/// Threshold evaluation and status latching.
pub mod engine;
/// Contains error types for the library.
mod error;
/// Reassembly of frames from split serial reads.
pub mod framer;
/// Defines the BCC telemetry wire format.
pub mod protocol;
/// Thresholds, status taxonomies and latches.
pub mod status;
/// Typed view of a decoded frame.
pub mod telemetry;

pub use engine::{EngineCommand, Snapshot, TelemetryStateEngine};
pub use error::Error;

/// Synchronous BCC telemetry reader.
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
#[cfg(feature = "serialport")]
pub mod serialport;

/// Asynchronous BCC telemetry reader.
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-serial-async")))]
#[cfg(feature = "tokio-serial-async")]
pub mod tokio_serial_async;
