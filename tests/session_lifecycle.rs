//! End-to-end checks of the command surface over the mock radio.

use pretty_assertions::assert_eq;
use spp_session::{
    ConnectionState, DeviceDescriptor, Error, MethodCall, MockRadio, RadioEvent, Reply,
    SppManager,
};
use std::sync::Arc;
use std::time::Duration;

const PEER: &str = "AA:BB:CC:DD:EE:FF";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn connect_send_disconnect_over_commands() {
    init_tracing();
    let radio = Arc::new(MockRadio::new().with_known_address(PEER));
    let manager = SppManager::new(radio.clone());

    let reply = manager
        .dispatch(MethodCall::new("connect").with_address(PEER))
        .await
        .unwrap();
    assert_eq!(reply, Reply::Success(true));
    assert_eq!(manager.connection_state(), ConnectionState::Connected);

    let reply = manager
        .dispatch(MethodCall::new("send").with_data(vec![72, 101, 108, 108, 111]))
        .await
        .unwrap();
    assert_eq!(reply, Reply::Success(true));
    assert_eq!(radio.transmitted(), vec![0x48, 0x65, 0x6C, 0x6C, 0x6F]);
    assert!(radio.unflushed().is_empty());

    let reply = manager.dispatch(MethodCall::new("disconnect")).await.unwrap();
    assert_eq!(reply, Reply::Success(true));
    assert_eq!(manager.connection_state(), ConnectionState::Idle);
    assert_eq!(radio.live_sockets(), 0);
    assert_eq!(radio.live_writers(), 0);
}

#[tokio::test]
async fn scan_waits_for_discovery_finished() {
    init_tracing();
    let bonded = DeviceDescriptor::named("HC-05", "00:14:03:05:59:E1");
    let found = DeviceDescriptor::new(None::<String>, "98:D3:31:F5:2A:10");
    let radio = Arc::new(MockRadio::new().with_bonded([bonded.clone()]).manual_finish());
    let manager = Arc::new(SppManager::new(radio.clone()));

    let scan = tokio::spawn({
        let manager = manager.clone();
        async move { manager.dispatch(MethodCall::new("scan")).await }
    });

    while !radio.has_subscriber() {
        tokio::task::yield_now().await;
    }
    assert!(manager.is_scanning());
    assert!(!scan.is_finished());

    radio.emit(RadioEvent::DeviceFound(found.clone()));
    radio.emit(RadioEvent::DeviceFound(bonded.clone()));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!scan.is_finished());

    radio.emit(RadioEvent::DiscoveryFinished);
    let reply = scan.await.unwrap().unwrap();

    assert_eq!(reply, Reply::Devices(vec![bonded.clone(), found, bonded]));
    assert!(!radio.has_subscriber());
    assert_eq!(radio.unsubscriptions(), 1);
}

#[tokio::test]
async fn connect_during_scan_cancels_discovery() {
    init_tracing();
    let radio = Arc::new(MockRadio::new().with_known_address(PEER).manual_finish());
    let manager = Arc::new(SppManager::new(radio.clone()));

    let scan = tokio::spawn({
        let manager = manager.clone();
        async move { manager.scan().await }
    });
    while !radio.is_discovering() {
        tokio::task::yield_now().await;
    }

    manager.connect(PEER).await.unwrap();

    let devices = scan.await.unwrap().unwrap();
    assert!(devices.is_empty());
    assert_eq!(radio.discovery_cancels(), 1);
    assert!(manager.is_connected());
}

#[tokio::test]
async fn failed_connect_then_retry() {
    init_tracing();
    let radio = Arc::new(MockRadio::new().with_known_address(PEER));
    let manager = SppManager::new(radio.clone());
    radio.fail_next_connect("connection refused");

    let err = manager
        .dispatch(MethodCall::new("connect").with_address(PEER))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONNECT_FAIL");
    assert!(err.is_transient());
    assert_eq!(manager.connection_state(), ConnectionState::Idle);
    assert_eq!(radio.live_sockets(), 0);

    manager.connect(PEER).await.unwrap();
    assert_eq!(radio.live_sockets(), 1);
}

#[tokio::test]
async fn unknown_address_is_rejected() {
    init_tracing();
    let manager = SppManager::new(Arc::new(MockRadio::new()));

    let err = manager
        .dispatch(MethodCall::new("connect").with_address("01:02:03:04:05:06"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidAddress { .. }));
    assert_eq!(err.code(), "INVALID_ADDRESS");
    assert_eq!(manager.connection_state(), ConnectionState::Idle);
}

#[tokio::test]
async fn send_when_idle_writes_nothing() {
    init_tracing();
    let radio = Arc::new(MockRadio::new());
    let manager = SppManager::new(radio.clone());

    let reply = manager
        .dispatch(MethodCall::new("send").with_data(vec![1, 2, 3]))
        .await
        .unwrap();

    assert_eq!(reply, Reply::Success(true));
    assert_eq!(radio.write_calls(), 0);
}

#[tokio::test]
async fn peer_loss_surfaces_write_failure() {
    init_tracing();
    let radio = Arc::new(MockRadio::new().with_known_address(PEER));
    let manager = SppManager::new(radio.clone());
    manager.connect(PEER).await.unwrap();

    radio.set_fail_writes(true);
    let err = manager
        .dispatch(MethodCall::new("send").with_data(vec![0x01]))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "WRITE_FAIL");
    assert!(!manager.is_connected());
    assert_eq!(radio.live_sockets(), 0);

    radio.set_fail_writes(false);
    manager.connect(PEER).await.unwrap();
    manager.send(&[0x02]).await.unwrap();
    assert_eq!(radio.transmitted(), vec![0x02]);
}
