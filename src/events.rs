//! Everything the driver emits toward the host: high-level notifications,
//! synthetic pointer events, and the two host facilities the session calls
//! into (pointer injection and display-topology remapping).

use serde::Serialize;
use strum_macros::Display;

use crate::constants::POINTER_ID;

/// One decoded touch sample, already scaled to screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TouchSample {
    pub down: bool,
    pub x: i32,
    pub y: i32,
    /// Always [`POINTER_ID`]; the controller reports one contact at a time.
    pub pointer_id: u8,
}

impl TouchSample {
    pub fn new(down: bool, x: i32, y: i32) -> Self {
        Self {
            down,
            x,
            y,
            pointer_id: POINTER_ID,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum PointerPhase {
    Down,
    Update,
    Up,
}

/// Synthetic pointer event handed to the host's injection facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PointerEvent {
    pub phase: PointerPhase,
    pub x: i32,
    pub y: i32,
    pub pointer_id: u8,
}

impl PointerEvent {
    pub fn new(phase: PointerPhase, x: i32, y: i32) -> Self {
        Self {
            phase,
            x,
            y,
            pointer_id: POINTER_ID,
        }
    }
}

/// OS-level synthetic-pointer-injection facility.
pub trait PointerSink: Send + Sync {
    fn inject(&self, event: PointerEvent) -> std::io::Result<()>;
}

/// Host display-topology facility. [`remap_touch_displays`](Self::remap_touch_displays)
/// is called once, after the first successful identity handshake, so the OS
/// can associate the digitizer with the right display.
pub trait DisplayTopology: Send + Sync {
    fn remap_touch_displays(&self) -> std::io::Result<()>;
}

/// Tint of one calibration crosshair on the operator screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum CrosshairColor {
    /// Not this target's turn yet.
    Inactive,
    /// Waiting for the operator to touch this target.
    Active,
    /// The controller acknowledged the touch.
    Acknowledged,
    /// The sequence failed at this target.
    Error,
}

/// Progress snapshot of the two-point calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CalibrationStatus {
    /// Raw controller status byte when a step failed, `None` on progress.
    pub error_code: Option<u8>,
    /// Key the operator UI resolves to a localized prompt.
    pub message_key: &'static str,
    pub lower_left: CrosshairColor,
    pub upper_right: CrosshairColor,
}

/// High-level notifications broadcast to the host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TouchNotification {
    /// Data arrived again after a disconnect episode.
    Connected,
    /// Keep-alive probes went unanswered.
    Disconnected,
    CalibrationStatus(CalibrationStatus),
    CalibrationCompleted {
        success: bool,
        message_key: &'static str,
    },
}

/// Message keys for the operator-facing calibration UI.
pub mod message_key {
    /// Prompt to touch the lower-left crosshair.
    pub const TOUCH_LOWER_LEFT: &str = "calibration.touch_lower_left";
    /// Prompt to touch the upper-right crosshair.
    pub const TOUCH_UPPER_RIGHT: &str = "calibration.touch_upper_right";
    /// A step failed; the device is being reset for another attempt.
    pub const FAILED_RETRYING: &str = "calibration.failed_retrying";
    /// Both targets acknowledged.
    pub const COMPLETED: &str = "calibration.completed";
    /// Retry budget exhausted.
    pub const ABANDONED: &str = "calibration.abandoned";
}
