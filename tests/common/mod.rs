//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use bytes::Bytes;
#[allow(unused_imports)]
pub use exii_touch::codec::encode_14bit;
#[allow(unused_imports)]
pub use exii_touch::command::TouchCommand;
#[allow(unused_imports)]
pub use exii_touch::config::TouchConfig;
#[allow(unused_imports)]
pub use exii_touch::constants::{
    HEADER, PROXIMITY_BIT, STATUS_GOOD, STATUS_TARGET_ACK, SYNC_BIT, TERMINATOR,
};
#[allow(unused_imports)]
pub use exii_touch::device::SerialTouchDevice;
#[allow(unused_imports)]
pub use exii_touch::error::TouchError;
#[allow(unused_imports)]
pub use exii_touch::events::{
    CrosshairColor, DisplayTopology, PointerEvent, PointerPhase, PointerSink, TouchNotification,
    message_key,
};
#[allow(unused_imports)]
pub use exii_touch::state::ProtocolState;
#[allow(unused_imports)]
pub use exii_touch::transport::{BoxedTransport, Transport, TransportError, TransportEvent};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Scripted stand-in for the serial transport: tests feed the byte stream
/// and keep-alive ticks, and inspect what the session wrote.
#[allow(dead_code)]
pub struct MockTransport {
    events: broadcast::Sender<TransportEvent>,
    written: Mutex<Vec<Bytes>>,
    enables: AtomicU32,
    disables: AtomicU32,
    fail_writes: AtomicBool,
    fail_next: AtomicU32,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            events,
            written: Mutex::new(Vec::new()),
            enables: AtomicU32::new(0),
            disables: AtomicU32::new(0),
            fail_writes: AtomicBool::new(false),
            fail_next: AtomicU32::new(0),
        })
    }

    /// Deliver received bytes to every subscriber.
    pub fn feed(&self, bytes: &[u8]) {
        let _ = self
            .events
            .send(TransportEvent::Data(Bytes::copy_from_slice(bytes)));
    }

    pub fn tick_keep_alive(&self) {
        let _ = self.events.send(TransportEvent::KeepAliveExpired);
    }

    pub fn raise_error(&self, err: TransportError) {
        let _ = self.events.send(TransportEvent::Error(err));
    }

    pub fn set_write_failure(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail only the next `count` writes, then let writes through again.
    pub fn fail_next_writes(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn write_count(&self) -> usize {
        self.written.lock().len()
    }

    pub fn take_writes(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.written.lock())
    }

    pub fn enable_count(&self) -> u32 {
        self.enables.load(Ordering::SeqCst)
    }

    pub fn disable_count(&self) -> u32 {
        self.disables.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn enable(&self) -> Result<(), TransportError> {
        self.enables.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disable(&self) -> Result<(), TransportError> {
        self.disables.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn write(&self, frame: Bytes) -> Result<(), TransportError> {
        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::Io("injected write failure".to_string()));
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Io("injected write failure".to_string()));
        }
        self.written.lock().push(frame);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

/// Records every injected pointer event.
#[derive(Default)]
#[allow(dead_code)]
pub struct RecordingPointer {
    events: Mutex<Vec<PointerEvent>>,
}

#[allow(dead_code)]
impl RecordingPointer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<PointerEvent> {
        self.events.lock().clone()
    }
}

impl PointerSink for RecordingPointer {
    fn inject(&self, event: PointerEvent) -> std::io::Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Counts topology remap calls.
#[derive(Default)]
#[allow(dead_code)]
pub struct RecordingTopology {
    remaps: AtomicU32,
}

#[allow(dead_code)]
impl RecordingTopology {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn remap_count(&self) -> u32 {
        self.remaps.load(Ordering::SeqCst)
    }
}

impl DisplayTopology for RecordingTopology {
    fn remap_touch_displays(&self) -> std::io::Result<()> {
        self.remaps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A session wired to the mocks, with its run loop already spawned and the
/// opening Null probe on the wire.
#[allow(dead_code)]
pub struct Harness {
    pub device: Arc<SerialTouchDevice>,
    pub transport: Arc<MockTransport>,
    pub pointer: Arc<RecordingPointer>,
    pub topology: Arc<RecordingTopology>,
    pub notifications: broadcast::Receiver<TouchNotification>,
    pub run: JoinHandle<Result<(), TouchError>>,
}

#[allow(dead_code)]
pub fn test_config() -> TouchConfig {
    TouchConfig {
        device_present: true,
        ..TouchConfig::default()
    }
}

#[allow(dead_code)]
pub async fn spawn_session(config: TouchConfig) -> Harness {
    let transport = MockTransport::new();
    let pointer = RecordingPointer::new();
    let topology = RecordingTopology::new();
    let device = Arc::new(SerialTouchDevice::new(
        config,
        transport.clone() as BoxedTransport,
        pointer.clone(),
        topology.clone(),
    ));
    let notifications = device.subscribe();
    let run = tokio::spawn({
        let device = device.clone();
        async move { device.run().await }
    });
    wait_until(|| transport.write_count() > 0).await;
    Harness {
        device,
        transport,
        pointer,
        topology,
        notifications,
        run,
    }
}

/// Poll `condition` until it holds, letting the paused clock advance past
/// any internal delays. Panics if it never does.
#[allow(dead_code)]
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..5_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached in time");
}

/// Wait for the session to write something, then drain the write log.
#[allow(dead_code)]
pub async fn await_writes(transport: &MockTransport) -> Vec<Bytes> {
    wait_until(|| transport.write_count() > 0).await;
    transport.take_writes()
}

/// Drain all notifications delivered so far.
#[allow(dead_code)]
pub fn drain_notifications(
    rx: &mut broadcast::Receiver<TouchNotification>,
) -> Vec<TouchNotification> {
    let mut out = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        out.push(notification);
    }
    out
}

#[allow(dead_code)]
pub fn response(payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![HEADER];
    frame.extend_from_slice(payload);
    frame.push(TERMINATOR);
    frame
}

#[allow(dead_code)]
pub fn status_response(status: u8) -> Vec<u8> {
    response(&[status])
}

#[allow(dead_code)]
pub fn text_response(text: &str) -> Vec<u8> {
    response(text.as_bytes())
}

#[allow(dead_code)]
pub fn touch_frame(down: bool, x: u16, y: u16) -> Vec<u8> {
    let status = if down { SYNC_BIT | PROXIMITY_BIT } else { SYNC_BIT };
    let (x_low, x_high) = encode_14bit(x);
    let (y_low, y_high) = encode_14bit(y);
    vec![status, x_low, x_high, y_low, y_high]
}

/// Answer the Null/Name/OutputIdentity handshake. Leaves whatever follows
/// (steady state or a pending calibration) to the caller.
#[allow(dead_code)]
pub async fn drive_handshake(harness: &Harness) {
    let writes = await_writes(&harness.transport).await;
    assert_eq!(writes.last(), Some(&TouchCommand::Null.frame()));
    harness.transport.feed(&status_response(STATUS_GOOD));

    let writes = await_writes(&harness.transport).await;
    assert_eq!(writes, vec![TouchCommand::Name.frame()]);
    harness.transport.feed(&text_response("TOUCH1"));

    let writes = await_writes(&harness.transport).await;
    assert_eq!(writes, vec![TouchCommand::OutputIdentity.frame()]);
    harness.transport.feed(&text_response("AB1234"));
}

/// Full bring-up into steady state.
#[allow(dead_code)]
pub async fn complete_bring_up(harness: &Harness) {
    drive_handshake(harness).await;
    wait_until(|| harness.device.state() == ProtocolState::InterpretTouch).await;
}

/// Drive an already-initialized session through RestoreDefaults, Reset,
/// Diagnostic, and CalibrateExtended, leaving it waiting on the first target.
#[allow(dead_code)]
pub async fn walk_to_lower_left(harness: &Harness) {
    harness.device.begin_calibration().await.unwrap();

    let writes = await_writes(&harness.transport).await;
    assert_eq!(writes, vec![TouchCommand::RestoreDefaults.frame()]);
    harness.transport.feed(&status_response(STATUS_GOOD));

    let writes = await_writes(&harness.transport).await;
    assert_eq!(writes, vec![TouchCommand::Reset.frame()]);
    harness.transport.feed(&status_response(STATUS_GOOD));

    // The settle pause after the reset elapses on the paused clock.
    let writes = await_writes(&harness.transport).await;
    assert_eq!(writes, vec![TouchCommand::Diagnostic.frame()]);
    harness.transport.feed(&status_response(STATUS_GOOD));

    let writes = await_writes(&harness.transport).await;
    assert_eq!(writes, vec![TouchCommand::CalibrateExtended.frame()]);
    harness.transport.feed(&status_response(STATUS_GOOD));

    wait_until(|| harness.device.state() == ProtocolState::LowerLeftTarget).await;
}

#[allow(dead_code)]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
