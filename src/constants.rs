// Protocol constants for EX II-compatible serial touch controllers

/// Header byte opening every command and response frame (SOH)
pub const HEADER: u8 = 0x01;

/// Terminator byte closing every command and response frame (CR)
pub const TERMINATOR: u8 = 0x0D;

/// High bit of a touch frame's status byte; always set on the wire
pub const SYNC_BIT: u8 = 0x80;

/// Status-byte bit set while the stylus/finger is in contact
pub const PROXIMITY_BIT: u8 = 0x40;

/// Touch frame length: status byte + X low/high + Y low/high
pub const TOUCH_FRAME_LEN: usize = 5;

/// Smallest well-formed response: header + one payload byte + terminator
pub const MIN_RESPONSE_LEN: usize = 3;

/// Responses longer than this without a terminator are treated as corruption
pub const MAX_RESPONSE_LEN: usize = 64;

/// Status payload byte reporting command success ('0')
pub const STATUS_GOOD: u8 = 0x30;

/// Status payload byte acknowledging a calibration target touch ('1')
pub const STATUS_TARGET_ACK: u8 = 0x31;

/// Highest coordinate the controller reports on either axis (14 bit)
pub const COORDINATE_MAX: u16 = 0x3FFF;

/// The single logical pointer identity used for all synthesized events
pub const POINTER_ID: u8 = 0;

/// Missed keep-alive probes tolerated beyond the first before reconnecting
pub const DEFAULT_MAX_PROBE_FAILURES: u32 = 3;

/// Calibration reset-and-retry cycles before giving up
pub const DEFAULT_MAX_CALIBRATION_ATTEMPTS: u32 = 3;

/// Settle time after the controller acknowledges a reset during calibration
pub const RESET_SETTLE: std::time::Duration = std::time::Duration::from_millis(250);

/// Pause after sending a recovery reset, before the session resumes
pub const RECOVERY_PAUSE: std::time::Duration = std::time::Duration::from_millis(250);
