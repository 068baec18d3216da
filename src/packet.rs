use bytes::Bytes;
use num_enum::{FromPrimitive, IntoPrimitive};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::codec;
use crate::constants::{HEADER, MIN_RESPONSE_LEN};
use crate::error::TouchError;

/// What a packet is, decided by its first byte when framing starts and fixed
/// for the packet's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Delimited ASCII frame answering a command (`0x01 … 0x0D`)
    CommandResponse,
    /// Fixed-length binary touch sample, emitted whenever the surface is touched
    TouchData,
}

/// Status payload byte of a single-status command response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum ResponseStatus {
    /// Command accepted ('0')
    Good = 0x30,
    /// Calibration target touch registered ('1')
    TargetAcknowledged = 0x31,

    #[num_enum(catch_all)]
    Unknown(u8),
}

/// A complete frame lifted off the wire by the framer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    kind: PacketKind,
    bytes: Bytes,
}

impl Packet {
    pub(crate) fn new(kind: PacketKind, bytes: Bytes) -> Self {
        Self { kind, bytes }
    }

    /// Classify a prospective first byte, or `None` if it cannot open a frame.
    pub fn classify(first: u8) -> Option<PacketKind> {
        if first == HEADER {
            Some(PacketKind::CommandResponse)
        } else if codec::has_sync_bit(first) {
            Some(PacketKind::TouchData)
        } else {
            None
        }
    }

    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Payload of a command response, without header and terminator.
    /// Empty for touch data.
    pub fn payload(&self) -> &[u8] {
        match self.kind {
            PacketKind::CommandResponse if self.bytes.len() >= MIN_RESPONSE_LEN => {
                &self.bytes[1..self.bytes.len() - 1]
            }
            _ => &[],
        }
    }

    /// Status byte of a single-status command response.
    pub fn status(&self) -> Option<ResponseStatus> {
        self.payload().first().map(|&b| ResponseStatus::from_primitive(b))
    }

    /// Payload decoded as text, with trailing NULs and whitespace removed
    /// (the controller pads name/identity responses).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(self.payload())
            .trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
            .to_string()
    }

    /// View a touch-data packet as its wire layout.
    pub fn touch_report(&self) -> Result<&TouchReport, TouchError> {
        TouchReport::ref_from_bytes(self.bytes.as_ref())
            .map_err(|_| TouchError::InvalidPacket(format!("touch frame of {} bytes", self.bytes.len())))
    }
}

/// Wire layout of a touch frame: one status byte, then the low/high halves of
/// X and Y. Data bytes keep bit 7 clear; the missing bits ride in the high
/// halves and are recombined by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct TouchReport {
    pub status: u8,
    pub x_low: u8,
    pub x_high: u8,
    pub y_low: u8,
    pub y_high: u8,
}

impl TouchReport {
    /// True while the contact is down; false on the lift-off sample.
    pub fn is_down(&self) -> bool {
        codec::has_proximity_bit(self.status)
    }

    pub fn has_sync(&self) -> bool {
        codec::has_sync_bit(self.status)
    }

    pub fn x(&self, low_order_mask: u8) -> u16 {
        codec::decode_14bit(self.x_low, self.x_high, low_order_mask)
    }

    pub fn y(&self, low_order_mask: u8) -> u16 {
        codec::decode_14bit(self.y_low, self.y_high, low_order_mask)
    }
}
