//! The controller's ASCII command set and its on-wire framing.

use bytes::{BufMut, Bytes, BytesMut};
use strum_macros::Display;

use crate::constants::{HEADER, TERMINATOR};
use crate::state::ProtocolTrigger;

/// Commands the driver sends during bring-up, calibration, and keep-alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TouchCommand {
    /// Liveness probe, also the first bring-up step.
    Null,
    /// Query the controller's model name.
    Name,
    /// Query the controller's identity string.
    OutputIdentity,
    /// Restore factory parameters ahead of a calibration pass.
    RestoreDefaults,
    /// Full device reset.
    Reset,
    /// Run the controller's self-diagnostic.
    Diagnostic,
    /// Start the two-point extended calibration.
    CalibrateExtended,
}

impl TouchCommand {
    /// ASCII mnemonic as the controller expects it between header and
    /// terminator.
    pub fn mnemonic(self) -> &'static str {
        match self {
            TouchCommand::Null => "Z",
            TouchCommand::Name => "NM",
            TouchCommand::OutputIdentity => "OI",
            TouchCommand::RestoreDefaults => "RD",
            TouchCommand::Reset => "R",
            TouchCommand::Diagnostic => "DX",
            TouchCommand::CalibrateExtended => "CX",
        }
    }

    /// The state-machine trigger that must be legal before this command may
    /// be sent.
    pub fn trigger(self) -> ProtocolTrigger {
        match self {
            TouchCommand::Null => ProtocolTrigger::Initialized,
            TouchCommand::Name => ProtocolTrigger::Name,
            TouchCommand::OutputIdentity => ProtocolTrigger::OutputIdentity,
            TouchCommand::RestoreDefaults => ProtocolTrigger::RestoreDefaults,
            TouchCommand::Reset => ProtocolTrigger::Reset,
            TouchCommand::Diagnostic => ProtocolTrigger::Diagnostic,
            TouchCommand::CalibrateExtended => ProtocolTrigger::CalibrateExtended,
        }
    }

    /// Complete wire frame: header, mnemonic, terminator.
    pub fn frame(self) -> Bytes {
        let mnemonic = self.mnemonic().as_bytes();
        let mut buf = BytesMut::with_capacity(mnemonic.len() + 2);
        buf.put_u8(HEADER);
        buf.put_slice(mnemonic);
        buf.put_u8(TERMINATOR);
        buf.freeze()
    }
}
