//! Coordinate codec for the controller's 14-bit reporting format.
//!
//! The controller reports each axis as two bytes with the high bit reserved:
//! the sync bit marks the start of a touch frame, so data bytes may only use
//! their low seven bits. Bit 7 of the low half therefore travels in bit 0 of
//! the high half and has to be stitched back in when decoding.

use crate::constants::{
    COORDINATE_MAX, HEADER, MIN_RESPONSE_LEN, PROXIMITY_BIT, SYNC_BIT, TERMINATOR, TOUCH_FRAME_LEN,
};

/// Reconstruct a 14-bit coordinate from its low/high wire bytes.
///
/// `low_order_mask` names low-order bits of the low byte to discard before
/// composing (jitter suppression on noisy panels; `0` keeps full resolution).
/// The masked high byte's bit 0 carries the low byte's missing bit 7; after
/// restoring it, the remaining high bits shift down and the result is
/// `(high << 8) | low`, in `0..=16383`.
pub fn decode_14bit(byte_low: u8, byte_high: u8, low_order_mask: u8) -> u16 {
    let mut low = byte_low & !(SYNC_BIT | low_order_mask);
    let mut high = byte_high & !SYNC_BIT;
    if high & 0x01 != 0 {
        low |= SYNC_BIT;
    }
    high >>= 1;
    (u16::from(high) << 8) | u16::from(low)
}

/// Split a 14-bit coordinate into the low/high wire bytes `decode_14bit`
/// consumes. Values above [`COORDINATE_MAX`] are truncated to 14 bits.
pub fn encode_14bit(value: u16) -> (u8, u8) {
    let value = value & COORDINATE_MAX;
    let low = (value & 0x7F) as u8;
    let carry = ((value >> 7) & 0x01) as u8;
    let high = (((value >> 8) as u8) << 1) | carry;
    (low, high)
}

/// Map device coordinates onto a `screen_width` x `screen_height` display.
///
/// The device origin is the lower-left corner while the host origin is the
/// upper-left, so Y is flipped before scaling.
pub fn scale_to_screen(raw_x: u16, raw_y: u16, screen_width: u32, screen_height: u32) -> (i32, i32) {
    let adjust_x = f64::from(COORDINATE_MAX) / f64::from(screen_width);
    let x = if raw_x > 0 {
        (f64::from(raw_x) / adjust_x).round()
    } else {
        0.0
    };

    let flipped_y = COORDINATE_MAX.saturating_sub(raw_y);
    let adjust_y = f64::from(COORDINATE_MAX) / f64::from(screen_height);
    let y = if flipped_y > 0 {
        (f64::from(flipped_y) / adjust_y).round()
    } else {
        0.0
    };

    (x as i32, y as i32)
}

/// True when `byte` carries the touch-frame sync marker.
pub fn has_sync_bit(byte: u8) -> bool {
    byte & SYNC_BIT != 0
}

/// True when a touch status byte reports contact (down) rather than lift-off.
pub fn has_proximity_bit(byte: u8) -> bool {
    byte & PROXIMITY_BIT != 0
}

/// True for a complete, well-formed touch frame.
pub fn is_valid_touch_frame(bytes: &[u8]) -> bool {
    bytes.len() == TOUCH_FRAME_LEN && bytes.first().is_some_and(|&b| has_sync_bit(b))
}

/// True for a complete, well-formed command-response frame.
pub fn is_valid_response_frame(bytes: &[u8]) -> bool {
    bytes.len() >= MIN_RESPONSE_LEN
        && bytes.first() == Some(&HEADER)
        && bytes.last() == Some(&TERMINATOR)
}
