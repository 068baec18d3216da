//! Protocol state machine for the controller's command/response sequencing.
//!
//! Bring-up, extended calibration, and steady-state touch interpretation are
//! all ordered by this machine: a command may only be sent when its trigger is
//! legal in the current state, and a response only advances the machine when
//! it matches what the state expects. Stray or duplicate responses surface as
//! [`IllegalTrigger`] and are logged and dropped by the caller.

use parking_lot::Mutex;
use strum_macros::Display;
use thiserror::Error;

/// Where the session currently sits in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ProtocolState {
    Uninitialized,
    Null,
    Name,
    OutputIdentity,
    RestoreDefaults,
    Reset,
    Diagnostic,
    CalibrateExtended,
    LowerLeftTarget,
    UpperRightTarget,
    InterpretTouch,
    Error,
}

/// Events that request a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ProtocolTrigger {
    Initialized,
    Name,
    OutputIdentity,
    RestoreDefaults,
    Reset,
    Diagnostic,
    CalibrateExtended,
    LowerLeftTarget,
    UpperRightTarget,
    InterpretTouch,
    Uninitialized,
    Error,
}

/// A trigger that is not legal in the current state. Benign: the machine is
/// left untouched and the caller decides whether to log or escalate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("trigger {trigger} is not valid in state {state}")]
pub struct IllegalTrigger {
    pub state: ProtocolState,
    pub trigger: ProtocolTrigger,
}

/// The full transition table. Pairs not listed are invalid and return `None`.
pub fn transition(state: ProtocolState, trigger: ProtocolTrigger) -> Option<ProtocolState> {
    use ProtocolState as S;
    use ProtocolTrigger as T;
    match (state, trigger) {
        (S::Uninitialized, T::Initialized) => Some(S::Null),

        (S::Null, T::Initialized) => Some(S::Null),
        (S::Null, T::Name) => Some(S::Name),
        (S::Null, T::InterpretTouch) => Some(S::InterpretTouch),
        (S::Null, T::Error) => Some(S::Error),

        (S::Name, T::OutputIdentity) => Some(S::OutputIdentity),
        (S::Name, T::InterpretTouch) => Some(S::InterpretTouch),

        (S::OutputIdentity, T::RestoreDefaults) => Some(S::RestoreDefaults),
        (S::OutputIdentity, T::InterpretTouch) => Some(S::InterpretTouch),

        (S::RestoreDefaults, T::Reset) => Some(S::Reset),
        (S::RestoreDefaults, T::InterpretTouch) => Some(S::InterpretTouch),
        (S::RestoreDefaults, T::Error) => Some(S::Error),

        (S::Reset, T::Uninitialized) => Some(S::Uninitialized),
        (S::Reset, T::Diagnostic) => Some(S::Diagnostic),
        (S::Reset, T::InterpretTouch) => Some(S::InterpretTouch),
        (S::Reset, T::Error) => Some(S::Error),

        (S::Diagnostic, T::CalibrateExtended) => Some(S::CalibrateExtended),
        (S::Diagnostic, T::InterpretTouch) => Some(S::InterpretTouch),
        (S::Diagnostic, T::Error) => Some(S::Error),

        (S::CalibrateExtended, T::LowerLeftTarget) => Some(S::LowerLeftTarget),
        (S::CalibrateExtended, T::Error) => Some(S::Error),

        (S::LowerLeftTarget, T::UpperRightTarget) => Some(S::UpperRightTarget),
        (S::LowerLeftTarget, T::Error) => Some(S::Error),

        (S::UpperRightTarget, T::InterpretTouch) => Some(S::InterpretTouch),
        (S::UpperRightTarget, T::Error) => Some(S::Error),

        (S::InterpretTouch, T::Initialized) => Some(S::Null),
        (S::InterpretTouch, T::RestoreDefaults) => Some(S::RestoreDefaults),
        (S::InterpretTouch, T::Error) => Some(S::Error),

        (S::Error, T::Initialized) => Some(S::Null),
        (S::Error, T::Reset) => Some(S::Reset),
        (S::Error, T::InterpretTouch) => Some(S::InterpretTouch),

        _ => None,
    }
}

/// Serialized wrapper around the table. Legality check and transition happen
/// under one lock so concurrent callers cannot interleave between them.
#[derive(Debug)]
pub struct ProtocolStateMachine {
    current: Mutex<ProtocolState>,
}

impl Default for ProtocolStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolStateMachine {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(ProtocolState::Uninitialized),
        }
    }

    pub fn state(&self) -> ProtocolState {
        *self.current.lock()
    }

    /// Apply `trigger` if it is legal in the current state. On rejection the
    /// state is left unchanged.
    pub fn fire(&self, trigger: ProtocolTrigger) -> Result<ProtocolState, IllegalTrigger> {
        let mut current = self.current.lock();
        match transition(*current, trigger) {
            Some(next) => {
                *current = next;
                Ok(next)
            }
            None => Err(IllegalTrigger {
                state: *current,
                trigger,
            }),
        }
    }

    /// Drop straight back to the power-on state, bypassing the table. Used by
    /// reconnect, which discards in-flight protocol progress unconditionally.
    pub fn reset(&self) {
        *self.current.lock() = ProtocolState::Uninitialized;
    }
}
