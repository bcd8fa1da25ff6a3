use crate::status::MeasurementKind;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The byte count does not match any supported frame length.
    #[error("Invalid frame size {0}")]
    FrameSizeError(usize),
    /// A word cannot be represented on the wire.
    #[error("Value {0} out of range")]
    RangeError(i64),
    #[error("Invalid {kind} threshold - minimum {min} exceeds maximum {max}")]
    ThresholdError {
        kind: MeasurementKind,
        min: i32,
        max: i32,
    },
    #[error("Unknown command {0:?}")]
    CommandError(String),
}
