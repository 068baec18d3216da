pub mod codec;
pub mod command;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod events;
pub mod framer;
pub mod packet;
pub mod state;
pub mod transport;

// Re-export the session and the types hosts wire it with
pub use config::{SerialSettings, TouchConfig};
pub use device::{DeviceInfo, SerialTouchDevice};
pub use error::TouchError;
pub use events::{
    CalibrationStatus, CrosshairColor, DisplayTopology, PointerEvent, PointerPhase, PointerSink,
    TouchNotification, TouchSample,
};
pub use transport::{BoxedTransport, Transport, TransportError, TransportEvent};
