//! Host-supplied configuration for the touch subsystem.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::constants::{DEFAULT_MAX_CALIBRATION_ATTEMPTS, DEFAULT_MAX_PROBE_FAILURES};

/// Serial parameters for the controller link. Consumed by the transport
/// implementation; the EX II line speaks 9600 8N1 with no flow control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub handshake: Handshake,
    #[serde(default = "default_write_timeout")]
    pub write_timeout: Duration,
    /// How often the transport raises a keep-alive expiry event.
    #[serde(default = "default_keep_alive_interval")]
    pub keep_alive_interval: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum Handshake {
    #[default]
    None,
    XonXoff,
    RequestToSend,
}

fn default_port() -> String {
    "/dev/ttyS0".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_write_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_keep_alive_interval() -> Duration {
    Duration::from_secs(1)
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: Parity::None,
            stop_bits: default_stop_bits(),
            handshake: Handshake::None,
            write_timeout: default_write_timeout(),
            keep_alive_interval: default_keep_alive_interval(),
        }
    }
}

/// Top-level subsystem configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchConfig {
    /// Operator setting. A disabled subsystem never opens the port.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Whether hardware discovery found a serial touch device in this
    /// cabinet.
    #[serde(default)]
    pub device_present: bool,
    #[serde(default = "default_screen_width")]
    pub screen_width: u32,
    #[serde(default = "default_screen_height")]
    pub screen_height: u32,
    /// Low-order coordinate bits to discard as noise, e.g. `0x0F` quantizes
    /// to steps of 16. Zero keeps full precision.
    #[serde(default)]
    pub low_order_mask: u8,
    /// Missed probes tolerated beyond the first before a forced reconnect.
    #[serde(default = "default_max_probe_failures")]
    pub max_probe_failures: u32,
    /// Reset-and-retry cycles before an in-progress calibration is abandoned.
    #[serde(default = "default_max_calibration_attempts")]
    pub max_calibration_attempts: u32,
    #[serde(default)]
    pub serial: SerialSettings,
}

fn default_enabled() -> bool {
    true
}

fn default_screen_width() -> u32 {
    1920
}

fn default_screen_height() -> u32 {
    1080
}

fn default_max_probe_failures() -> u32 {
    DEFAULT_MAX_PROBE_FAILURES
}

fn default_max_calibration_attempts() -> u32 {
    DEFAULT_MAX_CALIBRATION_ATTEMPTS
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            device_present: false,
            screen_width: default_screen_width(),
            screen_height: default_screen_height(),
            low_order_mask: 0,
            max_probe_failures: default_max_probe_failures(),
            max_calibration_attempts: default_max_calibration_attempts(),
            serial: SerialSettings::default(),
        }
    }
}

impl TouchConfig {
    /// The session only runs when the subsystem is enabled and discovery
    /// actually found a device.
    pub fn is_active(&self) -> bool {
        self.enabled && self.device_present
    }
}
