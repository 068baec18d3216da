//! Boundary to the serial transport.
//!
//! The session never opens ports itself: it drives an implementation of
//! [`Transport`] and reacts to the event stream the transport broadcasts.
//! Port management, buffered reads, and keep-alive expiry detection live
//! behind this trait.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;

/// Everything the transport pushes back at the session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A chunk of received bytes, in arrival order. Chunk boundaries carry no
    /// meaning; framing is the session's job.
    Data(Bytes),
    /// The transport failed. The session reconnects unconditionally.
    Error(TransportError),
    /// The keep-alive interval elapsed. Fired periodically regardless of
    /// traffic; the session decides whether data arrived in time.
    KeepAliveExpired,
}

/// Transport-level failures. Cloneable so they can travel the broadcast
/// channel to every subscriber.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("serial port not found: {0}")]
    PortNotFound(String),

    #[error("serial port closed")]
    Closed,

    #[error("serial write timed out")]
    WriteTimeout,

    #[error("serial I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => TransportError::WriteTimeout,
            std::io::ErrorKind::NotFound => TransportError::PortNotFound(e.to_string()),
            _ => TransportError::Io(e.to_string()),
        }
    }
}

/// A serial channel to the controller. Implementations own the port and a
/// reader task that feeds the broadcast channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the port and start delivering events.
    async fn enable(&self) -> Result<(), TransportError>;

    /// Close the port. Subscribers keep their receivers; no further events
    /// arrive until the next `enable`.
    async fn disable(&self) -> Result<(), TransportError>;

    /// Write one complete command frame.
    async fn write(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Subscribe to the event stream. Each call returns an independent
    /// receiver positioned at the current stream head.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

/// Type alias for a shared transport handle.
pub type BoxedTransport = Arc<dyn Transport>;
