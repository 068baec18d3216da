use thiserror::Error;

use crate::framer::FramingErrors;
use crate::state::IllegalTrigger;
use crate::transport::TransportError;

/// The primary error type for the `exii-touch` library.
#[derive(Error, Debug)]
pub enum TouchError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Framing(#[from] FramingErrors),

    #[error(transparent)]
    IllegalTrigger(#[from] IllegalTrigger),

    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("subsystem is disabled or this cabinet has no serial touch device")]
    NotActive,

    #[error("a calibration sequence is already in progress")]
    CalibrationInProgress,
}
