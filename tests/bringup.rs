//! Bring-up handshake, reconnect behavior, and session liveness

mod common;

use common::*;

#[tokio::test(start_paused = true)]
async fn happy_path_reaches_steady_state() {
    init_tracing();
    let harness = spawn_session(test_config()).await;
    complete_bring_up(&harness).await;

    let info = harness.device.device_info();
    assert!(info.initialized);
    assert_eq!(info.model.as_deref(), Some("TOUCH1"));
    assert_eq!(info.identity.as_deref(), Some("AB1234"));
    assert_eq!(harness.topology.remap_count(), 1);
    assert!(!harness.device.is_disconnected());
}

#[tokio::test]
async fn inactive_config_refuses_to_run() {
    let transport = MockTransport::new();
    let device = SerialTouchDevice::new(
        TouchConfig::default(),
        transport.clone() as BoxedTransport,
        RecordingPointer::new(),
        RecordingTopology::new(),
    );

    assert!(matches!(device.run().await, Err(TouchError::NotActive)));
    assert_eq!(transport.enable_count(), 0);

    assert!(matches!(
        device.begin_calibration().await,
        Err(TouchError::NotActive)
    ));
}

#[tokio::test(start_paused = true)]
async fn rejected_null_probe_forces_reconnect() {
    let harness = spawn_session(test_config()).await;
    let writes = await_writes(&harness.transport).await;
    assert_eq!(writes.last(), Some(&TouchCommand::Null.frame()));

    harness.transport.feed(&status_response(0x20));
    wait_until(|| harness.transport.enable_count() == 2).await;
    assert_eq!(harness.transport.disable_count(), 1);

    // The session starts over with a fresh probe.
    let writes = await_writes(&harness.transport).await;
    assert_eq!(writes, vec![TouchCommand::Null.frame()]);
    assert_eq!(harness.device.state(), ProtocolState::Null);
}

#[tokio::test(start_paused = true)]
async fn identity_survives_reconnect_but_initialized_does_not() {
    let harness = spawn_session(test_config()).await;
    complete_bring_up(&harness).await;

    harness.transport.raise_error(TransportError::Closed);
    wait_until(|| harness.transport.enable_count() == 2).await;

    let info = harness.device.device_info();
    assert!(!info.initialized);
    assert_eq!(info.model.as_deref(), Some("TOUCH1"));
    assert_eq!(info.identity.as_deref(), Some("AB1234"));

    complete_bring_up(&harness).await;
    assert!(harness.device.device_info().initialized);
    // The displays were already remapped for this device.
    assert_eq!(harness.topology.remap_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stray_response_in_steady_state_is_ignored() {
    let harness = spawn_session(test_config()).await;
    complete_bring_up(&harness).await;

    harness.transport.feed(&status_response(STATUS_GOOD));
    // A touch frame behind the stray response proves the loop got past it.
    harness.transport.feed(&touch_frame(true, 1, 1));
    wait_until(|| !harness.pointer.events().is_empty()).await;

    assert_eq!(harness.transport.write_count(), 0);
    assert_eq!(harness.device.state(), ProtocolState::InterpretTouch);
}

#[tokio::test(start_paused = true)]
async fn write_failure_ends_the_session_when_recovery_cannot_send() {
    let harness = spawn_session(test_config()).await;
    let writes = await_writes(&harness.transport).await;
    assert_eq!(writes.last(), Some(&TouchCommand::Null.frame()));

    // Every further write fails: the Name command triggers a reconnect and
    // the recovery probe cannot go out either.
    harness.transport.set_write_failure(true);
    harness.transport.feed(&status_response(STATUS_GOOD));

    let outcome = harness.run.await.unwrap();
    assert!(matches!(outcome, Err(TouchError::Transport(_))));
}

#[tokio::test(start_paused = true)]
async fn framing_noise_does_not_disturb_bring_up() {
    let harness = spawn_session(test_config()).await;
    let writes = await_writes(&harness.transport).await;
    assert_eq!(writes.last(), Some(&TouchCommand::Null.frame()));

    // Garbage, then a duplicated header, then the real response.
    harness.transport.feed(&[0x55]);
    let mut noisy = vec![0x01];
    noisy.extend_from_slice(&status_response(STATUS_GOOD));
    harness.transport.feed(&noisy);

    let writes = await_writes(&harness.transport).await;
    assert_eq!(writes, vec![TouchCommand::Name.frame()]);
}
