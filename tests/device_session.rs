//! End-to-end session tests against a loopback device

mod support;

use std::time::Duration;

use serde_json::json;

use edgesight::{
    AppPhase, BuildProfile, ClientUpdate, ConnectionError, Endpoint, LifecycleAction,
    SessionState, SessionTransport, Settings,
};
use support::{client_for, client_with, drain, person_batch, wait_for, FakeDevice, StalledDevice, WAIT};

const QUIET: Duration = Duration::from_millis(300);

async fn wait_until<F: Fn() -> bool>(check: F) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[tokio::test]
async fn test_track_then_object_leaves_view() {
    let mut device = FakeDevice::start().await;
    let client = client_for(&device.url);
    let mut updates = client.subscribe();

    client.connect().await.unwrap();
    wait_for(&mut updates, |u| matches!(u, ClientUpdate::Connected { .. })).await;

    device.send(person_batch());
    wait_for(&mut updates, |u| *u == ClientUpdate::ObjectsUpdated { count: 1 }).await;

    assert!(client.select(Some("1")));
    assert!(client.start_tracking());

    let snapshot = client.snapshot();
    assert_eq!(snapshot.selected_id.as_deref(), Some("1"));
    assert!(snapshot.tracking_enabled);
    assert!(snapshot.objects[0].is_tracked);

    assert_eq!(
        device.next_command(WAIT).await,
        Some(json!({"command": "start_tracking", "objectId": "1"}))
    );

    device.send(r#"{"type":"detections","objects":[]}"#);
    wait_for(&mut updates, |u| *u == ClientUpdate::TrackingChanged { enabled: false }).await;

    let snapshot = client.snapshot();
    assert!(snapshot.objects.is_empty());
    assert!(snapshot.selected_id.is_none());
    assert!(!snapshot.tracking_enabled);

    // Losing the object is not a user intent, so nothing goes back on the wire
    assert_eq!(device.next_command(QUIET).await, None);
}

#[tokio::test]
async fn test_stop_tracking_reaches_device() {
    let mut device = FakeDevice::start().await;
    let client = client_for(&device.url);
    let mut updates = client.subscribe();

    client.connect().await.unwrap();
    device.send(person_batch());
    wait_for(&mut updates, |u| matches!(u, ClientUpdate::ObjectsUpdated { .. })).await;

    client.select(Some("1"));
    client.start_tracking();
    client.stop_tracking();

    assert_eq!(
        device.next_command(WAIT).await,
        Some(json!({"command": "start_tracking", "objectId": "1"}))
    );
    assert_eq!(
        device.next_command(WAIT).await,
        Some(json!({"command": "stop_tracking"}))
    );
    assert_eq!(client.snapshot().selected_id.as_deref(), Some("1"));
}

#[tokio::test]
async fn test_malformed_messages_leave_state_alone() {
    let device = FakeDevice::start().await;
    let client = client_for(&device.url);
    let mut updates = client.subscribe();

    client.connect().await.unwrap();
    device.send(person_batch());
    wait_for(&mut updates, |u| matches!(u, ClientUpdate::ObjectsUpdated { .. })).await;
    let before = client.snapshot();

    device.send("not json at all");
    device.send(r#"{"type":"telemetry","cpu":0.4}"#);
    device.send(r#"{"objects":[]}"#);
    wait_until(|| client.decoder_stats().messages_rejected == 3).await;

    assert_eq!(client.snapshot(), before);
    assert_eq!(client.session_state(), SessionState::Connected);
}

#[tokio::test]
async fn test_invalid_records_are_dropped_individually() {
    let device = FakeDevice::start().await;
    let client = client_for(&device.url);
    let mut updates = client.subscribe();

    client.connect().await.unwrap();
    device.send(
        r#"{"type":"detections","objects":[
            {"id":"1","label":"Person","confidence":0.9,"bbox":{"x":0.1,"y":0.1,"width":0.2,"height":0.2}},
            {"id":"2","label":"Car","confidence":1.7,"bbox":{"x":0.1,"y":0.1,"width":0.2,"height":0.2}},
            {"id":"3","label":"Dog"}
        ]}"#,
    );
    wait_for(&mut updates, |u| *u == ClientUpdate::ObjectsUpdated { count: 1 }).await;

    let snapshot = client.snapshot();
    assert_eq!(snapshot.objects.len(), 1);
    assert_eq!(snapshot.objects[0].id, "1");
    wait_until(|| client.decoder_stats().records_dropped == 2).await;
}

#[tokio::test]
async fn test_latest_frame_wins() {
    let device = FakeDevice::start().await;
    let client = client_for(&device.url);
    let mut updates = client.subscribe();

    client.connect().await.unwrap();
    device.send(r#"{"type":"frame","frame":"Zmlyc3Q="}"#);
    device.send(r#"{"type":"frame","frame":"c2Vjb25k","timestamp":1700000000000}"#);
    wait_for(&mut updates, |u| *u == ClientUpdate::FrameUpdated).await;
    wait_for(&mut updates, |u| *u == ClientUpdate::FrameUpdated).await;

    let frame = client.snapshot().frame.unwrap();
    assert_eq!(frame.payload, "c2Vjb25k");
    assert_eq!(frame.device_timestamp, Some(1_700_000_000_000));
}

#[tokio::test]
async fn test_detections_with_embedded_frame() {
    let device = FakeDevice::start().await;
    let client = client_for(&device.url);
    let mut updates = client.subscribe();

    client.connect().await.unwrap();
    device.send(
        r#"{"type":"detections","frame":"aW1n","objects":[
            {"id":"7","label":"Bicycle","confidence":0.8,"bbox":{"x":0.5,"y":0.5,"width":0.1,"height":0.3}}
        ]}"#,
    );

    let first = wait_for(&mut updates, |u| {
        matches!(u, ClientUpdate::FrameUpdated | ClientUpdate::ObjectsUpdated { .. })
    })
    .await;
    assert_eq!(first, ClientUpdate::FrameUpdated);
    wait_for(&mut updates, |u| *u == ClientUpdate::ObjectsUpdated { count: 1 }).await;

    let snapshot = client.snapshot();
    assert_eq!(snapshot.frame.map(|f| f.payload).as_deref(), Some("aW1n"));
    assert_eq!(snapshot.objects[0].label, "Bicycle");
}

#[tokio::test]
async fn test_disconnect_twice_reports_once() {
    let device = FakeDevice::start().await;
    let client = client_for(&device.url);
    let mut updates = client.subscribe();

    client.connect().await.unwrap();
    wait_for(&mut updates, |u| matches!(u, ClientUpdate::Connected { .. })).await;

    client.disconnect();
    client.disconnect();

    let seen = drain(&mut updates, QUIET).await;
    let disconnects = seen
        .iter()
        .filter(|u| matches!(u, ClientUpdate::Disconnected { .. }))
        .count();
    assert_eq!(disconnects, 1);
    assert!(seen.contains(&ClientUpdate::Disconnected { reason: None }));
    assert_eq!(client.session_state(), SessionState::Disconnected);
    assert!(client.status().session_id.is_none());
}

#[tokio::test]
async fn test_device_close_clears_registry() {
    let device = FakeDevice::start().await;
    let client = client_for(&device.url);
    let mut updates = client.subscribe();

    client.connect().await.unwrap();
    device.send(person_batch());
    wait_for(&mut updates, |u| matches!(u, ClientUpdate::ObjectsUpdated { .. })).await;
    client.select(Some("1"));
    client.start_tracking();

    device.close();
    wait_for(&mut updates, |u| matches!(u, ClientUpdate::Disconnected { .. })).await;

    let snapshot = client.snapshot();
    assert!(snapshot.objects.is_empty());
    assert!(snapshot.selected_id.is_none());
    assert!(!snapshot.tracking_enabled);
    assert_eq!(client.session_state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_superseded_connect_stays_silent() {
    let mut device = StalledDevice::start().await;
    let client = client_for(&device.url);
    let mut updates = client.subscribe();

    let connecting = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    wait_until(|| client.session_state() == SessionState::Connecting).await;

    client.disconnect();
    device.release();

    assert!(connecting.await.unwrap().is_ok());
    let seen = drain(&mut updates, QUIET).await;
    assert!(!seen
        .iter()
        .any(|u| matches!(u, ClientUpdate::Connected { .. })));
    assert_eq!(client.session_state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_background_and_resume_reconnects() {
    let device = FakeDevice::start().await;
    let client = client_for(&device.url);
    let mut updates = client.subscribe();

    client.connect().await.unwrap();
    let first = match wait_for(&mut updates, |u| matches!(u, ClientUpdate::Connected { .. })).await {
        ClientUpdate::Connected { session_id } => session_id,
        _ => unreachable!(),
    };

    assert_eq!(
        client.set_app_phase(AppPhase::Background).await,
        Some(LifecycleAction::Disconnect)
    );
    assert_eq!(client.session_state(), SessionState::Disconnected);

    // Background -> Inactive is not a foreground edge
    assert_eq!(client.set_app_phase(AppPhase::Inactive).await, None);

    assert_eq!(
        client.set_app_phase(AppPhase::Active).await,
        Some(LifecycleAction::Connect)
    );
    let second = match wait_for(&mut updates, |u| matches!(u, ClientUpdate::Connected { .. })).await {
        ClientUpdate::Connected { session_id } => session_id,
        _ => unreachable!(),
    };
    assert_ne!(first, second);
    assert_eq!(client.session_state(), SessionState::Connected);
}

#[tokio::test]
async fn test_stale_objects_expire() {
    let device = FakeDevice::start().await;
    let settings = Settings {
        server_url: device.url.clone(),
        stale_after_ms: 300,
        ..Settings::default()
    };
    let client = client_with(settings);
    let mut updates = client.subscribe();

    client.connect().await.unwrap();
    device.send(person_batch());
    wait_for(&mut updates, |u| matches!(u, ClientUpdate::ObjectsUpdated { .. })).await;
    client.select(Some("1"));

    wait_for(&mut updates, |u| *u == ClientUpdate::ObjectsExpired).await;
    let snapshot = client.snapshot();
    assert!(snapshot.objects.is_empty());
    assert!(snapshot.selected_id.is_none());
    assert_eq!(client.session_state(), SessionState::Connected);
}

#[tokio::test]
async fn test_secure_connect_to_silent_peer_fails_cleanly() {
    // Accepts TCP, never answers the TLS handshake
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _peer = tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let endpoint = Endpoint::parse(&format!("wss://{}", addr), BuildProfile::Production).unwrap();
    let (transport, _events) = SessionTransport::new(Duration::from_millis(300));

    let result = transport.connect(&endpoint).await;
    assert!(matches!(
        result,
        Err(ConnectionError::Timeout { .. } | ConnectionError::Handshake { .. })
    ));
    assert_eq!(transport.state(), SessionState::Failed);
}

#[tokio::test]
async fn test_secure_connect_to_closing_peer_fails_cleanly() {
    // Accepts TCP, then hangs up mid handshake
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let endpoint = Endpoint::parse(&format!("wss://{}", addr), BuildProfile::Production).unwrap();
    let (transport, _events) = SessionTransport::new(Duration::from_secs(3));

    assert!(matches!(
        transport.connect(&endpoint).await,
        Err(ConnectionError::Handshake { .. })
    ));
    assert!(transport.status().last_error.is_some());
}
