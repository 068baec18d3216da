//! The device session: owns the framer and the state machine, drives
//! bring-up and calibration over the transport, interprets touch frames into
//! synthetic pointer events, and self-heals through keep-alive probing and
//! reconnects.
//!
//! All transport callbacks funnel through [`SerialTouchDevice::run`], which
//! processes events one at a time; shared trackers are behind short-lived
//! locks and nothing suspends while holding one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use crate::codec;
use crate::command::TouchCommand;
use crate::config::TouchConfig;
use crate::constants::{RECOVERY_PAUSE, RESET_SETTLE};
use crate::error::TouchError;
use crate::events::{
    CalibrationStatus, CrosshairColor, DisplayTopology, PointerEvent, PointerPhase, PointerSink,
    TouchNotification, TouchSample, message_key,
};
use crate::framer::PacketFramer;
use crate::packet::{Packet, PacketKind, ResponseStatus};
use crate::state::{ProtocolState, ProtocolStateMachine, ProtocolTrigger};
use crate::transport::{BoxedTransport, TransportError, TransportEvent};

/// Slots in the notification channel before slow subscribers start lagging.
const NOTIFICATION_CAPACITY: usize = 32;

/// Identity of the attached controller. Model and identity survive a
/// reconnect; `initialized` drops until the next handshake completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub initialized: bool,
    pub model: Option<String>,
    pub identity: Option<String>,
}

/// Why the last Reset command was sent, deciding how its response is routed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum ResetPurpose {
    /// Recover from a failed step: re-run bring-up from scratch.
    #[default]
    Recovery,
    /// Part of the calibration sequence: continue with the diagnostic.
    Calibration,
}

#[derive(Debug, Default)]
struct CalibrationProgress {
    /// Operator requested calibration; cleared on completion or abandonment.
    pending: bool,
    /// Failed reset-and-retry cycles so far.
    attempts: u32,
    reset_purpose: ResetPurpose,
}

#[derive(Debug, Default)]
struct DisconnectTracker {
    /// Data arrived since the keep-alive interval last expired.
    data_since_tick: bool,
    /// A probe went out and nothing has come back yet.
    awaiting: bool,
    /// Consecutive unanswered probes beyond the first.
    failures: u32,
    /// A Disconnected notification is outstanding; Connected fires on the
    /// next data arrival.
    is_disconnected: bool,
}

/// Outcome of a keep-alive interval expiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Healthy,
    FirstMiss { announce: bool },
    Probe { failures: u32 },
    Escalate,
}

impl DisconnectTracker {
    /// Advance the probe ladder by one expired interval.
    fn interval_expired(&mut self, max_probe_failures: u32) -> Verdict {
        if self.data_since_tick {
            self.data_since_tick = false;
            Verdict::Healthy
        } else if !self.awaiting {
            self.awaiting = true;
            let announce = !self.is_disconnected;
            self.is_disconnected = true;
            Verdict::FirstMiss { announce }
        } else {
            self.failures += 1;
            if self.failures > max_probe_failures {
                Verdict::Escalate
            } else {
                Verdict::Probe {
                    failures: self.failures,
                }
            }
        }
    }

    /// Record incoming data. True when this closes a disconnect episode.
    fn data_arrived(&mut self) -> bool {
        self.data_since_tick = true;
        self.awaiting = false;
        self.failures = 0;
        std::mem::take(&mut self.is_disconnected)
    }

    /// Forget probe progress without closing the episode; Connected still
    /// fires on the first data after a reconnect.
    fn reset_probes(&mut self) {
        self.data_since_tick = false;
        self.awaiting = false;
        self.failures = 0;
    }
}

/// Tracks the single logical contact so frames become down/update/up events.
#[derive(Debug, Default)]
struct PointerTracker {
    down: bool,
    last_x: i32,
    last_y: i32,
}

impl PointerTracker {
    fn advance(&mut self, sample: TouchSample) -> Option<PointerEvent> {
        let phase = match (self.down, sample.down) {
            (false, true) => Some(PointerPhase::Down),
            (true, true) => Some(PointerPhase::Update),
            (true, false) => Some(PointerPhase::Up),
            (false, false) => None,
        };
        self.down = sample.down;
        self.last_x = sample.x;
        self.last_y = sample.y;
        phase.map(|phase| PointerEvent::new(phase, sample.x, sample.y))
    }

    /// Force a lift-off at the last known position if a contact is held.
    fn release(&mut self) -> Option<PointerEvent> {
        if self.down {
            self.down = false;
            Some(PointerEvent::new(PointerPhase::Up, self.last_x, self.last_y))
        } else {
            None
        }
    }
}

/// What the run loop should do after handling one event. A reconnect carries
/// the pending calibration across only when the failed step was part of that
/// calibration; any other reconnect drops the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Reconnect { preserve_calibration: bool },
}

/// A session with one EX II-compatible controller.
///
/// Construct it with the transport, pointer-injection, and display-topology
/// facilities, then drive it with [`run`](Self::run). Notifications are
/// available through [`subscribe`](Self::subscribe) and an operator starts
/// calibration with [`begin_calibration`](Self::begin_calibration), both
/// usable from other tasks while `run` is live.
pub struct SerialTouchDevice {
    config: TouchConfig,
    transport: BoxedTransport,
    pointer: Arc<dyn PointerSink>,
    topology: Arc<dyn DisplayTopology>,
    machine: ProtocolStateMachine,
    framer: PacketFramer,
    info: Mutex<DeviceInfo>,
    calibration: Mutex<CalibrationProgress>,
    disconnect: Mutex<DisconnectTracker>,
    pointer_state: Mutex<PointerTracker>,
    in_flight: Mutex<Option<TouchCommand>>,
    topology_remapped: AtomicBool,
    notifications: broadcast::Sender<TouchNotification>,
}

impl SerialTouchDevice {
    pub fn new(
        config: TouchConfig,
        transport: BoxedTransport,
        pointer: Arc<dyn PointerSink>,
        topology: Arc<dyn DisplayTopology>,
    ) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            config,
            transport,
            pointer,
            topology,
            machine: ProtocolStateMachine::new(),
            framer: PacketFramer::new(),
            info: Mutex::new(DeviceInfo::default()),
            calibration: Mutex::new(CalibrationProgress::default()),
            disconnect: Mutex::new(DisconnectTracker::default()),
            pointer_state: Mutex::new(PointerTracker::default()),
            in_flight: Mutex::new(None),
            topology_remapped: AtomicBool::new(false),
            notifications,
        }
    }

    /// Subscribe to connect/disconnect and calibration notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<TouchNotification> {
        self.notifications.subscribe()
    }

    /// Snapshot of the controller's identity record.
    pub fn device_info(&self) -> DeviceInfo {
        self.info.lock().clone()
    }

    pub fn state(&self) -> ProtocolState {
        self.machine.state()
    }

    /// Whether the session currently considers the device unreachable.
    pub fn is_disconnected(&self) -> bool {
        self.disconnect.lock().is_disconnected
    }

    pub fn config(&self) -> &TouchConfig {
        &self.config
    }

    /// Open the transport and process its events until it closes or fails
    /// beyond recovery. Transient failures (framing noise, unanswered probes,
    /// transport errors) are handled internally via reset and reconnect.
    pub async fn run(&self) -> Result<(), TouchError> {
        if !self.config.is_active() {
            info!("serial touch subsystem inactive");
            return Err(TouchError::NotActive);
        }
        info!(port = %self.config.serial.port, "starting serial touch session");
        self.transport.enable().await?;
        let mut events = self.transport.subscribe();
        self.start_handshake().await?;

        loop {
            let flow = match events.recv().await {
                Ok(TransportEvent::Data(bytes)) => {
                    self.note_data_arrival();
                    self.handle_data(&bytes).await
                }
                Ok(TransportEvent::KeepAliveExpired) => self.handle_keep_alive().await,
                Ok(TransportEvent::Error(err)) => {
                    warn!(%err, "transport error");
                    Flow::Reconnect {
                        preserve_calibration: false,
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event stream lagged, resynchronizing framer");
                    self.framer.reset();
                    Flow::Continue
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(TransportError::Closed.into());
                }
            };
            if let Flow::Reconnect {
                preserve_calibration,
            } = flow
            {
                self.recover(&mut events, preserve_calibration).await?;
            }
        }
    }

    /// Request the two-point extended calibration.
    ///
    /// Starts immediately from steady state, otherwise it is picked up as
    /// soon as the next identity handshake completes. Progress and outcome
    /// arrive as notifications, never as errors from the session.
    pub async fn begin_calibration(&self) -> Result<(), TouchError> {
        if !self.config.is_active() {
            return Err(TouchError::NotActive);
        }
        {
            let mut cal = self.calibration.lock();
            if cal.pending {
                return Err(TouchError::CalibrationInProgress);
            }
            cal.pending = true;
            cal.attempts = 0;
        }
        info!("extended calibration requested");
        self.release_pointer();
        if self.machine.state() == ProtocolState::InterpretTouch {
            match self.send_command(TouchCommand::RestoreDefaults).await {
                Ok(()) => {}
                Err(TouchError::IllegalTrigger(err)) => {
                    // Lost a race with the run loop; the bring-up path
                    // resumes the pending calibration instead.
                    debug!(%err, "calibration deferred");
                }
                Err(err) => {
                    // Fall back to steady state so the keep-alive watchdog
                    // keeps running; the request stays pending and resumes
                    // at the next handshake.
                    warn!(%err, "calibration start failed, awaiting recovery");
                    if let Err(err) = self.machine.fire(ProtocolTrigger::InterpretTouch) {
                        debug!(%err, "steady state restore suppressed");
                    }
                    *self.in_flight.lock() = None;
                }
            }
        } else {
            debug!(state = %self.machine.state(), "calibration deferred until bring-up completes");
        }
        Ok(())
    }

    /// Fire the command's trigger and write its frame. The frame is not
    /// written when the trigger is illegal in the current state.
    async fn send_command(&self, command: TouchCommand) -> Result<(), TouchError> {
        let next = self.machine.fire(command.trigger())?;
        trace!(%command, state = %next, "sending command");
        *self.in_flight.lock() = Some(command);
        self.transport.write(command.frame()).await?;
        Ok(())
    }

    /// Run-loop variant of [`send_command`](Self::send_command): illegal
    /// triggers are benign and logged, transport failures force a reconnect.
    /// `preserve_calibration` marks sends that are part of the calibration
    /// sequence, so the reconnect keeps the operator's request alive.
    async fn send_or_recover(&self, command: TouchCommand, preserve_calibration: bool) -> Flow {
        match self.send_command(command).await {
            Ok(()) => Flow::Continue,
            Err(TouchError::IllegalTrigger(err)) => {
                debug!(%err, "command suppressed");
                Flow::Continue
            }
            Err(err) => {
                warn!(%command, %err, "command write failed");
                Flow::Reconnect {
                    preserve_calibration,
                }
            }
        }
    }

    async fn start_handshake(&self) -> Result<(), TouchError> {
        self.send_command(TouchCommand::Null).await
    }

    /// Tear the session down and bring the transport back up. Model and
    /// identity are kept, protocol progress and framing state are not. A
    /// pending calibration is dropped unless the caller asks to carry it
    /// across, in which case it resumes after the next handshake.
    async fn reconnect(&self, preserve_calibration: bool) -> Result<(), TouchError> {
        warn!("reconnecting serial touch session");
        self.release_pointer();
        if !preserve_calibration {
            self.drop_pending_calibration();
        }
        self.machine.reset();
        self.framer.reset();
        *self.in_flight.lock() = None;
        self.info.lock().initialized = false;
        self.disconnect.lock().reset_probes();
        if let Err(err) = self.transport.disable().await {
            debug!(%err, "transport disable during reconnect");
        }
        self.transport.enable().await?;
        Ok(())
    }

    async fn recover(
        &self,
        events: &mut broadcast::Receiver<TransportEvent>,
        preserve_calibration: bool,
    ) -> Result<(), TouchError> {
        self.reconnect(preserve_calibration).await?;
        *events = self.transport.subscribe();
        self.start_handshake().await
    }

    /// Clear a pending calibration request and tell the operator it is gone.
    fn drop_pending_calibration(&self) {
        let dropped = {
            let mut cal = self.calibration.lock();
            cal.attempts = 0;
            cal.reset_purpose = ResetPurpose::Recovery;
            std::mem::take(&mut cal.pending)
        };
        if dropped {
            warn!("pending calibration dropped by reconnect");
            self.publish(TouchNotification::CalibrationCompleted {
                success: false,
                message_key: message_key::ABANDONED,
            });
        }
    }

    /// Any received data proves the device is alive.
    fn note_data_arrival(&self) {
        if self.disconnect.lock().data_arrived() {
            info!("serial touch device connected");
            self.publish(TouchNotification::Connected);
        }
    }

    async fn handle_data(&self, bytes: &[u8]) -> Flow {
        if let Err(batch) = self.framer.append(bytes) {
            for err in &batch.errors {
                warn!("framing: {err}");
            }
        }
        let Some(packets) = self.framer.try_take_packets() else {
            return Flow::Continue;
        };
        for packet in packets {
            let flow = match packet.kind() {
                PacketKind::CommandResponse => self.handle_response(packet).await,
                PacketKind::TouchData => {
                    self.handle_touch(&packet);
                    Flow::Continue
                }
            };
            // A reconnect discards whatever else completed in this batch.
            if matches!(flow, Flow::Reconnect { .. }) {
                return flow;
            }
        }
        Flow::Continue
    }

    /// Route a command response by the state the machine entered when the
    /// command was sent.
    async fn handle_response(&self, packet: Packet) -> Flow {
        let state = self.machine.state();
        let answered = self.in_flight.lock().take();
        debug!(%state, ?answered, payload = %hex::encode(packet.payload()), "response");
        match state {
            ProtocolState::Null => self.on_null_response(&packet).await,
            ProtocolState::Name => self.on_name_response(&packet).await,
            ProtocolState::OutputIdentity => self.on_identity_response(&packet).await,
            ProtocolState::RestoreDefaults => self.on_restore_defaults_response(&packet).await,
            ProtocolState::Reset => self.on_reset_response(&packet).await,
            ProtocolState::Diagnostic => self.on_diagnostic_response(&packet).await,
            ProtocolState::CalibrateExtended => self.on_calibrate_response(&packet).await,
            ProtocolState::LowerLeftTarget => self.on_lower_left_response(&packet).await,
            ProtocolState::UpperRightTarget => self.on_upper_right_response(&packet).await,
            ProtocolState::Uninitialized | ProtocolState::InterpretTouch | ProtocolState::Error => {
                debug!(%state, "stray response dropped");
                Flow::Continue
            }
        }
    }

    async fn on_null_response(&self, packet: &Packet) -> Flow {
        if !matches!(packet.status(), Some(ResponseStatus::Good)) {
            warn!(code = raw_status(packet), "null probe rejected");
            return Flow::Reconnect {
                preserve_calibration: false,
            };
        }
        self.send_or_recover(TouchCommand::Name, false).await
    }

    async fn on_name_response(&self, packet: &Packet) -> Flow {
        let model = packet.text();
        info!(%model, "controller model");
        self.info.lock().model = Some(model);
        self.send_or_recover(TouchCommand::OutputIdentity, false).await
    }

    async fn on_identity_response(&self, packet: &Packet) -> Flow {
        let identity = packet.text();
        info!(%identity, "controller initialized");
        {
            let mut info = self.info.lock();
            info.identity = Some(identity);
            info.initialized = true;
        }
        if !self.topology_remapped.swap(true, Ordering::SeqCst) {
            if let Err(err) = self.topology.remap_touch_displays() {
                error!(%err, "touch display remap failed");
            }
        }
        if self.calibration.lock().pending {
            return self.send_or_recover(TouchCommand::RestoreDefaults, true).await;
        }
        match self.machine.fire(ProtocolTrigger::InterpretTouch) {
            Ok(_) => debug!("entering steady state"),
            Err(err) => debug!(%err, "steady state transition suppressed"),
        }
        Flow::Continue
    }

    async fn on_restore_defaults_response(&self, packet: &Packet) -> Flow {
        if !matches!(packet.status(), Some(ResponseStatus::Good)) {
            return self.calibration_error(raw_status(packet)).await;
        }
        self.calibration.lock().reset_purpose = ResetPurpose::Calibration;
        self.send_or_recover(TouchCommand::Reset, true).await
    }

    async fn on_reset_response(&self, packet: &Packet) -> Flow {
        if !matches!(packet.status(), Some(ResponseStatus::Good)) {
            warn!(code = raw_status(packet), "reset rejected");
            return Flow::Reconnect {
                preserve_calibration: false,
            };
        }
        let purpose = self.calibration.lock().reset_purpose;
        match purpose {
            ResetPurpose::Calibration => {
                // Give the controller time to settle before the diagnostic.
                sleep(RESET_SETTLE).await;
                self.send_or_recover(TouchCommand::Diagnostic, true).await
            }
            ResetPurpose::Recovery => {
                match self.machine.fire(ProtocolTrigger::Uninitialized) {
                    Ok(_) => self.send_or_recover(TouchCommand::Null, true).await,
                    Err(err) => {
                        debug!(%err, "recovery restart suppressed");
                        Flow::Continue
                    }
                }
            }
        }
    }

    async fn on_diagnostic_response(&self, packet: &Packet) -> Flow {
        if !matches!(packet.status(), Some(ResponseStatus::Good)) {
            return self.calibration_error(raw_status(packet)).await;
        }
        self.send_or_recover(TouchCommand::CalibrateExtended, true).await
    }

    async fn on_calibrate_response(&self, packet: &Packet) -> Flow {
        if !matches!(packet.status(), Some(ResponseStatus::Good)) {
            return self.calibration_error(raw_status(packet)).await;
        }
        match self.machine.fire(ProtocolTrigger::LowerLeftTarget) {
            Ok(_) => {
                self.publish(TouchNotification::CalibrationStatus(CalibrationStatus {
                    error_code: None,
                    message_key: message_key::TOUCH_LOWER_LEFT,
                    lower_left: CrosshairColor::Active,
                    upper_right: CrosshairColor::Inactive,
                }));
                Flow::Continue
            }
            Err(err) => {
                debug!(%err, "lower-left arm suppressed");
                Flow::Continue
            }
        }
    }

    async fn on_lower_left_response(&self, packet: &Packet) -> Flow {
        if !matches!(packet.status(), Some(ResponseStatus::TargetAcknowledged)) {
            return self.calibration_error(raw_status(packet)).await;
        }
        match self.machine.fire(ProtocolTrigger::UpperRightTarget) {
            Ok(_) => {
                info!("lower-left target acknowledged");
                self.publish(TouchNotification::CalibrationStatus(CalibrationStatus {
                    error_code: None,
                    message_key: message_key::TOUCH_UPPER_RIGHT,
                    lower_left: CrosshairColor::Acknowledged,
                    upper_right: CrosshairColor::Active,
                }));
                Flow::Continue
            }
            Err(err) => {
                debug!(%err, "upper-right arm suppressed");
                Flow::Continue
            }
        }
    }

    async fn on_upper_right_response(&self, packet: &Packet) -> Flow {
        if !matches!(packet.status(), Some(ResponseStatus::TargetAcknowledged)) {
            return self.calibration_error(raw_status(packet)).await;
        }
        match self.machine.fire(ProtocolTrigger::InterpretTouch) {
            Ok(_) => {
                info!("extended calibration completed");
                {
                    let mut cal = self.calibration.lock();
                    cal.pending = false;
                    cal.attempts = 0;
                }
                self.publish(TouchNotification::CalibrationCompleted {
                    success: true,
                    message_key: message_key::COMPLETED,
                });
                Flow::Continue
            }
            Err(err) => {
                debug!(%err, "calibration completion suppressed");
                Flow::Continue
            }
        }
    }

    /// A calibration step reported a bad status: mark the crosshairs red,
    /// reset the device for another attempt, and pause before continuing.
    /// The retry budget bounds how often this cycle may repeat.
    async fn calibration_error(&self, code: u8) -> Flow {
        if let Err(err) = self.machine.fire(ProtocolTrigger::Error) {
            debug!(%err, "error transition suppressed");
        }
        let abandoned = {
            let mut cal = self.calibration.lock();
            cal.attempts += 1;
            cal.reset_purpose = ResetPurpose::Recovery;
            warn!(
                code = format_args!("0x{code:02X}"),
                attempt = cal.attempts,
                "calibration step failed"
            );
            if cal.attempts >= self.config.max_calibration_attempts {
                cal.pending = false;
                true
            } else {
                false
            }
        };
        let key = if abandoned {
            message_key::ABANDONED
        } else {
            message_key::FAILED_RETRYING
        };
        self.publish(TouchNotification::CalibrationStatus(CalibrationStatus {
            error_code: Some(code),
            message_key: key,
            lower_left: CrosshairColor::Error,
            upper_right: CrosshairColor::Error,
        }));
        if abandoned {
            warn!("calibration retry budget exhausted");
            self.publish(TouchNotification::CalibrationCompleted {
                success: false,
                message_key: message_key::ABANDONED,
            });
        }
        *self.in_flight.lock() = None;
        let flow = self.send_or_recover(TouchCommand::Reset, !abandoned).await;
        sleep(RECOVERY_PAUSE).await;
        flow
    }

    /// Keep-alive expiry: decide under the tracker lock, then act.
    async fn handle_keep_alive(&self) -> Flow {
        let state = self.machine.state();
        if !matches!(state, ProtocolState::Null | ProtocolState::InterpretTouch) {
            return Flow::Continue;
        }
        let verdict = self
            .disconnect
            .lock()
            .interval_expired(self.config.max_probe_failures);
        match verdict {
            Verdict::Healthy => Flow::Continue,
            Verdict::FirstMiss { announce } => {
                if announce {
                    warn!("no data since last keep-alive, probing");
                    self.publish(TouchNotification::Disconnected);
                }
                self.send_or_recover(TouchCommand::Null, false).await
            }
            Verdict::Probe { failures } => {
                debug!(failures, "keep-alive probe unanswered");
                self.send_or_recover(TouchCommand::Null, false).await
            }
            Verdict::Escalate => {
                warn!("keep-alive failures exceeded limit");
                Flow::Reconnect {
                    preserve_calibration: false,
                }
            }
        }
    }

    /// Interpret one touch frame into a synthetic pointer event. Only valid
    /// in steady state; anywhere else the frame is dropped.
    fn handle_touch(&self, packet: &Packet) {
        let state = self.machine.state();
        if state != ProtocolState::InterpretTouch {
            trace!(%state, "touch frame outside steady state dropped");
            return;
        }
        let report = match packet.touch_report() {
            Ok(report) => report,
            Err(err) => {
                warn!(%err, "malformed touch frame dropped");
                return;
            }
        };
        if !report.has_sync() {
            warn!("touch frame without sync bit dropped");
            return;
        }
        let mask = self.config.low_order_mask;
        let (x, y) = codec::scale_to_screen(
            report.x(mask),
            report.y(mask),
            self.config.screen_width,
            self.config.screen_height,
        );
        let sample = TouchSample::new(report.is_down(), x, y);
        trace!(?sample, "touch sample");
        let event = self.pointer_state.lock().advance(sample);
        if let Some(event) = event {
            self.inject(event);
        }
    }

    /// Lift a held contact, e.g. before a reconnect would strand it down.
    fn release_pointer(&self) {
        let event = self.pointer_state.lock().release();
        if let Some(event) = event {
            debug!("releasing held pointer");
            self.inject(event);
        }
    }

    fn inject(&self, event: PointerEvent) {
        if let Err(err) = self.pointer.inject(event) {
            error!(%err, "pointer injection failed");
        }
    }

    fn publish(&self, notification: TouchNotification) {
        debug!(?notification, "notify");
        // Nobody listening is fine.
        let _ = self.notifications.send(notification);
    }
}

fn raw_status(packet: &Packet) -> u8 {
    packet.payload().first().copied().unwrap_or_default()
}
