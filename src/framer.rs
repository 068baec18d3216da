//! Reassembles the controller's two framing conventions out of one byte
//! stream: delimited ASCII command responses and fixed-length binary touch
//! frames. The stream has no outer packet boundaries, so the framer re-derives
//! them from the header byte and the sync bit, and resynchronizes instead of
//! stalling when the stream is corrupted.

use std::collections::VecDeque;
use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use thiserror::Error;

use crate::codec;
use crate::constants::{HEADER, MAX_RESPONSE_LEN, MIN_RESPONSE_LEN, TERMINATOR, TOUCH_FRAME_LEN};
use crate::packet::{Packet, PacketKind};

/// One corrupted stretch of the stream: the partial frame that had to be
/// dropped (possibly empty) and the byte that exposed the corruption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramingError {
    pub dropped: Bytes,
    pub offending: u8,
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dropped.is_empty() {
            write!(f, "unexpected byte 0x{:02X} outside any frame", self.offending)
        } else {
            write!(
                f,
                "frame dropped at byte 0x{:02X}, discarded [{}]",
                self.offending,
                hex::encode(&self.dropped)
            )
        }
    }
}

/// Aggregate of every framing error recorded while appending one batch.
/// Completed packets from the same batch are already queued when this is
/// returned; callers drain them regardless.
#[derive(Debug, Clone, Error)]
#[error("{} framing error(s) in batch", .errors.len())]
pub struct FramingErrors {
    pub errors: Vec<FramingError>,
}

#[derive(Default)]
struct FramerInner {
    partial: BytesMut,
    kind: Option<PacketKind>,
    completed: VecDeque<Packet>,
    errors: Vec<FramingError>,
}

/// Streaming packet assembler. All mutation happens under one internal lock
/// so the transport callback and the draining side may race freely.
#[derive(Default)]
pub struct PacketFramer {
    inner: Mutex<FramerInner>,
}

impl PacketFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a batch of received bytes.
    ///
    /// Completed packets are queued for [`try_take_packets`](Self::try_take_packets)
    /// as they finish. If any part of the batch was corrupt, the collected
    /// [`FramingErrors`] are returned after the queueing has happened; the
    /// stream itself stays usable.
    pub fn append(&self, data: &[u8]) -> Result<(), FramingErrors> {
        let mut inner = self.inner.lock();
        for &byte in data {
            Self::push_byte(&mut inner, byte);
        }
        if inner.errors.is_empty() {
            Ok(())
        } else {
            Err(FramingErrors {
                errors: std::mem::take(&mut inner.errors),
            })
        }
    }

    /// Atomically drain the completed-packet queue, in completion order.
    /// Returns `None` when nothing has completed since the last drain.
    pub fn try_take_packets(&self) -> Option<Vec<Packet>> {
        let mut inner = self.inner.lock();
        if inner.completed.is_empty() {
            None
        } else {
            Some(inner.completed.drain(..).collect())
        }
    }

    /// Discard all in-progress and completed state. Used on reconnect.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.partial.clear();
        inner.kind = None;
        inner.completed.clear();
        inner.errors.clear();
    }

    fn push_byte(inner: &mut FramerInner, byte: u8) {
        let Some(kind) = inner.kind else {
            // Nothing in progress: only a header or sync byte may open a frame.
            match Packet::classify(byte) {
                Some(kind) => {
                    inner.kind = Some(kind);
                    inner.partial.put_u8(byte);
                }
                None => inner.errors.push(FramingError {
                    dropped: Bytes::new(),
                    offending: byte,
                }),
            }
            return;
        };

        // A header or sync byte inside a frame means a new frame started
        // before this one terminated: drop the partial and restart on it.
        let restart = match kind {
            PacketKind::TouchData => codec::has_sync_bit(byte),
            PacketKind::CommandResponse => byte == HEADER || codec::has_sync_bit(byte),
        };
        if restart {
            let dropped = inner.partial.split().freeze();
            inner.errors.push(FramingError {
                dropped,
                offending: byte,
            });
            inner.kind = Packet::classify(byte);
            inner.partial.put_u8(byte);
            return;
        }

        inner.partial.put_u8(byte);

        match kind {
            PacketKind::CommandResponse => {
                if byte == TERMINATOR {
                    let bytes = inner.partial.split().freeze();
                    inner.kind = None;
                    if bytes.len() >= MIN_RESPONSE_LEN {
                        inner.completed.push_back(Packet::new(PacketKind::CommandResponse, bytes));
                    } else {
                        // Terminator arrived before any payload byte.
                        inner.errors.push(FramingError {
                            dropped: bytes,
                            offending: byte,
                        });
                    }
                } else if inner.partial.len() >= MAX_RESPONSE_LEN {
                    // Unterminated response past any plausible length.
                    let dropped = inner.partial.split().freeze();
                    inner.kind = None;
                    inner.errors.push(FramingError {
                        dropped,
                        offending: byte,
                    });
                }
            }
            PacketKind::TouchData => {
                if inner.partial.len() == TOUCH_FRAME_LEN {
                    let bytes = inner.partial.split().freeze();
                    inner.kind = None;
                    inner.completed.push_back(Packet::new(PacketKind::TouchData, bytes));
                }
            }
        }
    }
}
