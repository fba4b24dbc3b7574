//! Integration Tests for the Session Coordinator
//!
//! Drives complete BlueChat nodes against the in-memory mock radio: discovery,
//! hosting, the client session lifecycle and message persistence, observed
//! through the application event stream.

use std::sync::Arc;
use std::time::Duration;

use bluechat_core::{
    BluechatConfig, BluechatError, ConnectionState, CoreEvent, Direction, FailureReason,
    GattStatus, LinkHandle, LinkOperation, PeerIdentity, RadioTransport,
};
use bluechat_harness::{MockRadio, MockRadioConfig, RadioCall};
use bluechat_runtime::scanner::DIRECTORY_RETENTION;
use bluechat_runtime::SessionCoordinator;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

const LOCAL: PeerIdentity = PeerIdentity::new(0x0a0b0c0d);
const PEER_X: PeerIdentity = PeerIdentity::new(0x1234abcd);
const PEER_Y: PeerIdentity = PeerIdentity::new(0x55aa55aa);
const ADDRESS_X: &str = "AA:BB:CC:DD:EE:01";
const ADDRESS_Y: &str = "AA:BB:CC:DD:EE:02";

fn create_node(radio: &Arc<MockRadio>) -> (SessionCoordinator, mpsc::Receiver<CoreEvent>) {
    create_node_with_identity(radio, LOCAL)
}

fn create_node_with_identity(
    radio: &Arc<MockRadio>,
    identity: PeerIdentity,
) -> (SessionCoordinator, mpsc::Receiver<CoreEvent>) {
    let transport: Arc<dyn RadioTransport> = radio.clone();
    SessionCoordinator::builder(transport)
        .with_config(BluechatConfig::testing())
        .with_identity(identity)
        .build()
        .expect("testing config is valid")
}

async fn next_event(events: &mut mpsc::Receiver<CoreEvent>) -> CoreEvent {
    timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("event should arrive within timeout")
        .expect("event stream should stay open")
}

/// Assert nothing else is emitted for a while
async fn assert_quiet(events: &mut mpsc::Receiver<CoreEvent>) {
    let extra = timeout(Duration::from_millis(200), events.recv()).await;
    assert!(extra.is_err(), "unexpected event: {:?}", extra);
}

/// Read events until one matches `predicate`, returning everything seen
async fn events_until(
    events: &mut mpsc::Receiver<CoreEvent>,
    predicate: impl Fn(&CoreEvent) -> bool,
) -> Vec<CoreEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = predicate(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn state_changes(events: &[CoreEvent], identity: PeerIdentity) -> Vec<ConnectionState> {
    events
        .iter()
        .filter_map(|event| match event {
            CoreEvent::ConnectionStateChanged { identity: id, state } if *id == identity => {
                Some(*state)
            }
            _ => None,
        })
        .collect()
}

/// Poll `condition` until it holds
async fn wait_for(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition should hold within timeout");
}

/// Scan until `identity` is reported by the node
async fn discover(
    node: &SessionCoordinator,
    radio: &MockRadio,
    events: &mut mpsc::Receiver<CoreEvent>,
    identity: PeerIdentity,
    address: &str,
) {
    if !node.is_discovering() {
        node.start_discovery(None).await.unwrap();
    }
    let advertisement = MockRadio::advertisement_for(identity, address, Some("bluechat-peer"));
    assert!(radio.inject_advertisement(advertisement).await);
    events_until(events, |event| {
        matches!(event, CoreEvent::PeerDiscovered { identity: id, .. } if *id == identity)
    })
    .await;
}

/// Discover, connect and wait for `identity` to become ready
async fn connect_ready(
    node: &SessionCoordinator,
    radio: &MockRadio,
    events: &mut mpsc::Receiver<CoreEvent>,
    identity: PeerIdentity,
    address: &str,
) -> (LinkHandle, Vec<CoreEvent>) {
    discover(node, radio, events, identity, address).await;
    node.connect(identity).await.unwrap();
    node.wait_ready().await.unwrap();
    let seen = events_until(events, |event| {
        matches!(
            event,
            CoreEvent::ConnectionStateChanged { state: ConnectionState::Ready, .. }
        )
    })
    .await;
    (radio.last_link().expect("a link was opened"), seen)
}

// ----------------------------------------------------------------------------
// Discovery Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_repeated_advertisements_discover_once() {
    let radio = Arc::new(MockRadio::ideal());
    let (node, mut events) = create_node(&radio);

    node.start_discovery(Some(Duration::from_secs(5))).await.unwrap();
    for _ in 0..50 {
        let advertisement = MockRadio::advertisement_for(PEER_X, ADDRESS_X, Some("alice"));
        assert!(radio.inject_advertisement(advertisement).await);
    }

    assert_eq!(
        next_event(&mut events).await,
        CoreEvent::PeerDiscovered {
            identity: PEER_X,
            display_name: Some("alice".to_string()),
        }
    );
    assert_quiet(&mut events).await;
    assert!(node.is_online(PEER_X));
}

#[tokio::test]
async fn test_foreign_advertisements_are_ignored() {
    let radio = Arc::new(MockRadio::ideal());
    let (node, mut events) = create_node(&radio);

    node.start_discovery(None).await.unwrap();
    let mut foreign = MockRadio::advertisement_for(PEER_X, ADDRESS_X, None);
    foreign.service_uuids = vec![Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb)];
    assert!(radio.inject_advertisement(foreign).await);

    assert_quiet(&mut events).await;
    assert!(!node.is_online(PEER_X));
    assert!(node.online_peers().is_empty());
}

#[tokio::test]
async fn test_name_filter_limits_discovery() {
    let radio = Arc::new(MockRadio::ideal());
    let transport: Arc<dyn RadioTransport> = radio.clone();
    let (node, mut events) = SessionCoordinator::builder(transport)
        .with_config(BluechatConfig::testing())
        .with_identity(LOCAL)
        .with_name_filter("bc-")
        .build()
        .unwrap();

    node.start_discovery(None).await.unwrap();
    let hidden = MockRadio::advertisement_for(PEER_X, ADDRESS_X, Some("phone"));
    let shown = MockRadio::advertisement_for(PEER_Y, ADDRESS_Y, Some("bc-55aa55aa"));
    assert!(radio.inject_advertisement(hidden).await);
    assert!(radio.inject_advertisement(shown).await);

    match next_event(&mut events).await {
        CoreEvent::PeerDiscovered { identity, .. } => assert_eq!(identity, PEER_Y),
        other => panic!("expected discovery, got {:?}", other),
    }
    assert_quiet(&mut events).await;
}

#[tokio::test]
async fn test_stop_discovery_is_idempotent() {
    let radio = Arc::new(MockRadio::ideal());
    let (node, _events) = create_node(&radio);

    node.stop_discovery().await.unwrap();
    node.start_discovery(None).await.unwrap();
    assert!(node.is_discovering());
    assert!(radio.is_scanning());

    node.stop_discovery().await.unwrap();
    node.stop_discovery().await.unwrap();
    assert!(!node.is_discovering());
    assert!(!radio.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_scan_stops_after_timeout() {
    let radio = Arc::new(MockRadio::ideal());
    let (node, _events) = create_node(&radio);

    node.start_discovery(Some(Duration::from_secs(5))).await.unwrap();
    assert!(radio.is_scanning());

    tokio::time::sleep(Duration::from_secs(6)).await;
    wait_for(|| !node.is_discovering()).await;
    assert!(!radio.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_presence_follows_sighting_window() {
    let radio = Arc::new(MockRadio::ideal());
    let (node, mut events) = create_node(&radio);

    assert!(!node.is_online(PEER_X));

    node.start_discovery(Some(Duration::from_secs(60))).await.unwrap();
    let advertisement = MockRadio::advertisement_for(PEER_X, ADDRESS_X, None);
    assert!(radio.inject_advertisement(advertisement).await);
    next_event(&mut events).await;
    assert!(node.is_online(PEER_X));

    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(node.is_online(PEER_X));

    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(!node.is_online(PEER_X));
}

#[tokio::test]
async fn test_unavailable_radio_is_reported() {
    let radio = Arc::new(MockRadio::ideal());
    radio.set_radio_available(false);
    let (node, _events) = create_node(&radio);

    assert_eq!(
        node.start_discovery(None).await.unwrap_err(),
        BluechatError::RadioUnavailable
    );
    assert_eq!(node.host().await.unwrap_err(), BluechatError::RadioUnavailable);
    assert!(!node.is_hosting());
    assert!(radio.calls().is_empty());

    radio.set_radio_available(true);
    node.start_discovery(None).await.unwrap();
}

// ----------------------------------------------------------------------------
// Hosting Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_host_advertises_identity() {
    let radio = Arc::new(MockRadio::ideal());
    let (node, _events) = create_node(&radio);

    node.host().await.unwrap();
    node.host().await.unwrap();
    assert!(node.is_hosting());
    assert!(radio.is_server_open());
    assert!(radio.is_advertising());

    let advertised: Vec<_> = radio
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            RadioCall::Advertise(payload) => Some(payload),
            _ => None,
        })
        .collect();
    assert_eq!(advertised.len(), 2);
    assert_eq!(
        bluechat_core::protocol::extract_peer_identity(&advertised[0].advertised_identifier),
        Some(LOCAL)
    );

    node.stop_hosting().await.unwrap();
    node.stop_hosting().await.unwrap();
    assert!(!node.is_hosting());
    assert!(!radio.is_server_open());
    assert!(!radio.is_advertising());
}

#[tokio::test]
async fn test_stop_hosting_closes_server_when_advertising_fails_to_stop() {
    let radio = Arc::new(MockRadio::ideal());
    let (node, _events) = create_node(&radio);
    node.host().await.unwrap();

    radio.update_config(|config| config.stop_advertising_fails = true);
    assert_eq!(
        node.stop_hosting().await.unwrap_err(),
        BluechatError::RadioUnavailable
    );
    assert!(!node.is_hosting());
    assert!(!radio.is_server_open());
    assert!(radio.calls().contains(&RadioCall::CloseServer));

    // Nothing left to release
    node.stop_hosting().await.unwrap();
}

#[tokio::test]
async fn test_inbound_write_is_attributed_and_persisted() {
    let radio = Arc::new(MockRadio::ideal());
    let (node, mut events) = create_node(&radio);

    discover(&node, &radio, &mut events, PEER_X, ADDRESS_X).await;
    node.host().await.unwrap();

    let request = radio.client_write(ADDRESS_X, "hello there", true).await.unwrap();
    let message = match next_event(&mut events).await {
        CoreEvent::MessageReceived(message) => message,
        other => panic!("expected message, got {:?}", other),
    };
    assert_eq!(message.content, "hello there");
    assert_eq!(message.peer_identity, PEER_X);
    assert_eq!(message.sender_identity, PEER_X.to_string());
    assert_eq!(message.direction, Direction::Received);
    assert!(radio
        .responses()
        .contains(&(request, GattStatus::SUCCESS, Vec::new())));

    let history = node.history(PEER_X).await.unwrap();
    assert_eq!(history, vec![message]);
    let known = node.known_peers().await.unwrap();
    assert_eq!(known.len(), 1);
    assert_eq!(known[0].identity, PEER_X);
}

#[tokio::test]
async fn test_uncorrelated_write_is_unattributed() {
    let radio = Arc::new(MockRadio::ideal());
    let (node, mut events) = create_node(&radio);
    node.host().await.unwrap();

    radio.client_write(ADDRESS_Y, "who am i", false).await.unwrap();
    let message = match next_event(&mut events).await {
        CoreEvent::MessageReceived(message) => message,
        other => panic!("expected message, got {:?}", other),
    };
    assert_eq!(message.peer_identity, PeerIdentity::UNATTRIBUTED);
    assert_eq!(message.sender_identity, ADDRESS_Y);
    assert!(radio.responses().is_empty());
    assert!(node.known_peers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_write_is_acknowledged_but_dropped() {
    let radio = Arc::new(MockRadio::ideal());
    let (node, mut events) = create_node(&radio);
    node.host().await.unwrap();

    let request = radio.client_write(ADDRESS_X, Vec::new(), true).await.unwrap();
    wait_for(|| !radio.responses().is_empty()).await;

    assert_eq!(
        radio.responses(),
        vec![(request, GattStatus::SUCCESS, Vec::new())]
    );
    assert_quiet(&mut events).await;
    assert!(node.history(PeerIdentity::UNATTRIBUTED).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_server_read_honors_offset() {
    let radio = Arc::new(MockRadio::ideal());
    let (node, mut events) = create_node(&radio);
    node.host().await.unwrap();

    let empty = radio.client_read(ADDRESS_X, 0).await.unwrap();
    radio.client_write(ADDRESS_X, "hello", false).await.unwrap();
    next_event(&mut events).await;
    let partial = radio.client_read(ADDRESS_X, 2).await.unwrap();
    wait_for(|| radio.responses().len() == 2).await;

    assert_eq!(
        radio.responses(),
        vec![
            (empty, GattStatus::SUCCESS, Vec::new()),
            (partial, GattStatus::SUCCESS, b"llo".to_vec()),
        ]
    );
}

// ----------------------------------------------------------------------------
// Client Session Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_reaches_ready() {
    let radio = Arc::new(MockRadio::ideal());
    let (node, mut events) = create_node(&radio);

    let (_link, seen) = connect_ready(&node, &radio, &mut events, PEER_X, ADDRESS_X).await;
    assert_eq!(
        state_changes(&seen, PEER_X),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::ServicesDiscovered,
            ConnectionState::Ready,
        ]
    );

    let view = node.session_view().await.unwrap();
    assert!(view.is_ready());
    assert_eq!(view.max_payload, Some(182));
    assert_eq!(view.display_name.as_deref(), Some("bluechat-peer"));

    let known = node.known_peers().await.unwrap();
    assert_eq!(known[0].identity, PEER_X);
    assert_eq!(known[0].display_name.as_deref(), Some("bluechat-peer"));
}

#[tokio::test]
async fn test_connect_to_unknown_peer_fails() {
    let radio = Arc::new(MockRadio::ideal());
    let (node, _events) = create_node(&radio);

    assert!(matches!(
        node.connect(PEER_Y).await,
        Err(BluechatError::PeerNotFound { .. })
    ));
    assert!(node.session_view().await.is_none());
    assert!(radio.calls().is_empty());
}

#[tokio::test]
async fn test_connect_with_radio_off_is_reported() {
    let radio = Arc::new(MockRadio::ideal());
    let (node, mut events) = create_node(&radio);
    discover(&node, &radio, &mut events, PEER_X, ADDRESS_X).await;

    radio.set_radio_available(false);
    assert_eq!(
        node.connect(PEER_X).await.unwrap_err(),
        BluechatError::RadioUnavailable
    );
    assert!(node.session_view().await.is_none());
    assert!(radio.last_link().is_none());

    radio.set_radio_available(true);
    node.connect(PEER_X).await.unwrap();
    node.wait_ready().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stale_peers_are_pruned_when_scanning_again() {
    let radio = Arc::new(MockRadio::ideal());
    let (node, mut events) = create_node(&radio);
    discover(&node, &radio, &mut events, PEER_X, ADDRESS_X).await;
    node.stop_discovery().await.unwrap();

    tokio::time::advance(DIRECTORY_RETENTION + Duration::from_secs(1)).await;
    node.start_discovery(None).await.unwrap();

    assert!(node.online_peers().is_empty());
    assert!(matches!(
        node.connect(PEER_X).await,
        Err(BluechatError::PeerNotFound { .. })
    ));
}

#[tokio::test]
async fn test_small_mtu_rejects_oversized_message() {
    let radio = Arc::new(MockRadio::new(MockRadioConfig::ideal().with_mtu(Some(23))));
    let (node, mut events) = create_node(&radio);
    let (link, _) = connect_ready(&node, &radio, &mut events, PEER_X, ADDRESS_X).await;

    let oversized = "a".repeat(30);
    assert_eq!(
        node.send(oversized).await.unwrap_err(),
        BluechatError::PayloadTooLarge { size: 30, max: 20 }
    );
    assert!(radio.writes(link).is_empty());
    assert!(node.history(PEER_X).await.unwrap().is_empty());

    let fits = "b".repeat(20);
    let message = node.send(fits.clone()).await.unwrap();
    assert_eq!(message.direction, Direction::Sent);
    assert_eq!(
        next_event(&mut events).await,
        CoreEvent::MessageSendResult {
            message_id: message.id,
            success: true,
        }
    );
    assert_eq!(radio.writes(link), vec![fits.into_bytes()]);
    assert_eq!(node.history(PEER_X).await.unwrap(), vec![message]);
}

#[tokio::test]
async fn test_message_travels_between_nodes() {
    let radio_a = Arc::new(MockRadio::ideal());
    let radio_b = Arc::new(MockRadio::new(MockRadioConfig::ideal().with_mtu(Some(23))));
    let (host, mut host_events) = create_node_with_identity(&radio_a, PEER_X);
    let (joiner, mut joiner_events) = create_node_with_identity(&radio_b, PEER_Y);

    // A hears B's advertisement, so B's writes can be attributed
    discover(&host, &radio_a, &mut host_events, PEER_Y, ADDRESS_Y).await;
    host.host().await.unwrap();

    let (link, _) = connect_ready(&joiner, &radio_b, &mut joiner_events, PEER_X, ADDRESS_X).await;
    let text = "twenty byte message!";
    joiner.send(text).await.unwrap();

    let written = radio_b.writes(link);
    assert_eq!(written.len(), 1);
    radio_a.client_write(ADDRESS_Y, written[0].clone(), true).await.unwrap();

    let received = match next_event(&mut host_events).await {
        CoreEvent::MessageReceived(message) => message,
        other => panic!("expected message, got {:?}", other),
    };
    assert_eq!(received.content, text);
    assert_eq!(received.peer_identity, PEER_Y);

    let sent = joiner.history(PEER_X).await.unwrap();
    let stored = host.history(PEER_Y).await.unwrap();
    assert_eq!(sent[0].content, stored[0].content);
    assert_eq!(sent[0].sender_identity, stored[0].sender_identity);
}

#[tokio::test]
async fn test_send_requires_ready_session() {
    let radio = Arc::new(MockRadio::manual());
    let (node, mut events) = create_node(&radio);

    assert!(matches!(
        node.send("too early").await,
        Err(BluechatError::NotReady { .. })
    ));

    discover(&node, &radio, &mut events, PEER_X, ADDRESS_X).await;
    node.connect(PEER_X).await.unwrap();
    assert!(matches!(
        node.send("still connecting").await,
        Err(BluechatError::NotReady { .. })
    ));
    assert!(matches!(node.read().await, Err(BluechatError::NotReady { .. })));

    assert!(!radio
        .calls()
        .iter()
        .any(|call| matches!(call, RadioCall::Write(..) | RadioCall::Read(..))));
    assert!(node.history(PEER_X).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_write_reports_send_result() {
    let radio = Arc::new(MockRadio::new(
        MockRadioConfig::ideal().with_write_status(GattStatus::FAILURE),
    ));
    let (node, mut events) = create_node(&radio);
    let (link, _) = connect_ready(&node, &radio, &mut events, PEER_X, ADDRESS_X).await;

    let message = node.send("lost").await.unwrap();
    let seen = events_until(&mut events, |event| {
        matches!(
            event,
            CoreEvent::ConnectionStateChanged { state: ConnectionState::Failed(_), .. }
        )
    })
    .await;

    assert!(seen.contains(&CoreEvent::MessageSendResult {
        message_id: message.id,
        success: false,
    }));
    assert_eq!(
        state_changes(&seen, PEER_X),
        vec![ConnectionState::Failed(FailureReason::TransportFailure {
            operation: LinkOperation::Write,
            status: GattStatus::FAILURE,
        })]
    );
    wait_for(|| radio.close_count(link) == 1).await;
}

#[tokio::test]
async fn test_read_forwards_remote_value() {
    let radio = Arc::new(MockRadio::new(
        MockRadioConfig::ideal().with_read_value("pong"),
    ));
    let (node, mut events) = create_node(&radio);
    connect_ready(&node, &radio, &mut events, PEER_X, ADDRESS_X).await;

    node.read().await.unwrap();
    let message = match next_event(&mut events).await {
        CoreEvent::MessageReceived(message) => message,
        other => panic!("expected message, got {:?}", other),
    };
    assert_eq!(message.content, "pong");
    assert_eq!(message.peer_identity, PEER_X);
    assert_eq!(node.history(PEER_X).await.unwrap(), vec![message]);

    let view = node.session_view().await.unwrap();
    assert_eq!(view.last_message_received.as_deref(), Some("pong"));
}

#[tokio::test]
async fn test_non_compliant_peer_fails() {
    let radio = Arc::new(MockRadio::new(MockRadioConfig::non_compliant()));
    let (node, mut events) = create_node(&radio);

    discover(&node, &radio, &mut events, PEER_X, ADDRESS_X).await;
    node.connect(PEER_X).await.unwrap();
    assert_eq!(
        node.wait_ready().await.unwrap_err(),
        BluechatError::PeerNotProtocolCompliant {
            peer: PEER_X.to_string()
        }
    );

    let seen = events_until(&mut events, |event| {
        matches!(
            event,
            CoreEvent::ConnectionStateChanged { state: ConnectionState::Failed(_), .. }
        )
    })
    .await;
    assert_eq!(
        state_changes(&seen, PEER_X).last(),
        Some(&ConnectionState::Failed(FailureReason::PeerNotProtocolCompliant))
    );

    let link = radio.last_link().unwrap();
    wait_for(|| radio.close_count(link) == 1).await;
    assert!(node.known_peers().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_connect_times_out() {
    let radio = Arc::new(MockRadio::manual());
    let (node, mut events) = create_node(&radio);

    discover(&node, &radio, &mut events, PEER_X, ADDRESS_X).await;
    node.connect(PEER_X).await.unwrap();
    assert_eq!(
        node.wait_ready().await.unwrap_err(),
        BluechatError::Timeout { duration_ms: 2000 }
    );

    let seen = events_until(&mut events, |event| {
        matches!(
            event,
            CoreEvent::ConnectionStateChanged { state: ConnectionState::Failed(_), .. }
        )
    })
    .await;
    assert_eq!(
        state_changes(&seen, PEER_X),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Failed(FailureReason::Timeout),
        ]
    );

    // A failed session may be retried
    let first = radio.last_link().unwrap();
    wait_for(|| radio.close_count(first) == 1).await;
    node.connect(PEER_X).await.unwrap();
    wait_for(|| radio.last_link() != Some(first)).await;
}

#[tokio::test]
async fn test_double_disconnect_emits_once() {
    let radio = Arc::new(MockRadio::ideal());
    let (node, mut events) = create_node(&radio);
    let (link, _) = connect_ready(&node, &radio, &mut events, PEER_X, ADDRESS_X).await;

    node.disconnect().await.unwrap();
    node.disconnect().await.unwrap();

    assert_eq!(
        next_event(&mut events).await,
        CoreEvent::ConnectionStateChanged {
            identity: PEER_X,
            state: ConnectionState::Disconnected,
        }
    );
    assert_quiet(&mut events).await;
    assert_eq!(radio.close_count(link), 1);
    assert!(node.session_view().await.is_none());
}

#[tokio::test]
async fn test_remote_disconnect_then_local_disconnect() {
    let radio = Arc::new(MockRadio::ideal());
    let (node, mut events) = create_node(&radio);
    let (link, _) = connect_ready(&node, &radio, &mut events, PEER_X, ADDRESS_X).await;

    assert!(radio.simulate_disconnect(link).await);
    assert_eq!(
        next_event(&mut events).await,
        CoreEvent::ConnectionStateChanged {
            identity: PEER_X,
            state: ConnectionState::Disconnected,
        }
    );

    node.disconnect().await.unwrap();
    assert_quiet(&mut events).await;
    assert_eq!(radio.close_count(link), 1);
}

#[tokio::test]
async fn test_new_peer_replaces_session() {
    let radio = Arc::new(MockRadio::ideal());
    let (node, mut events) = create_node(&radio);

    let (first, _) = connect_ready(&node, &radio, &mut events, PEER_X, ADDRESS_X).await;
    discover(&node, &radio, &mut events, PEER_Y, ADDRESS_Y).await;
    node.connect(PEER_Y).await.unwrap();
    node.wait_ready().await.unwrap();

    let seen = events_until(&mut events, |event| {
        matches!(
            event,
            CoreEvent::ConnectionStateChanged { state: ConnectionState::Ready, .. }
        )
    })
    .await;
    assert_eq!(state_changes(&seen, PEER_X), vec![ConnectionState::Disconnected]);
    assert_eq!(state_changes(&seen, PEER_Y).last(), Some(&ConnectionState::Ready));
    assert_eq!(radio.close_count(first), 1);
    assert_eq!(radio.open_links().len(), 1);
    assert_eq!(node.session_view().await.unwrap().identity, PEER_Y);
}

#[tokio::test]
async fn test_reconnect_to_same_peer_is_noop() {
    let radio = Arc::new(MockRadio::ideal());
    let (node, mut events) = create_node(&radio);
    connect_ready(&node, &radio, &mut events, PEER_X, ADDRESS_X).await;

    node.connect(PEER_X).await.unwrap();
    assert_quiet(&mut events).await;
    let connects = radio
        .calls()
        .iter()
        .filter(|call| matches!(call, RadioCall::Connect(_)))
        .count();
    assert_eq!(connects, 1);
}

// ----------------------------------------------------------------------------
// History Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_forget_and_clear() {
    let radio = Arc::new(MockRadio::ideal());
    let (node, mut events) = create_node(&radio);
    connect_ready(&node, &radio, &mut events, PEER_X, ADDRESS_X).await;
    node.send("one").await.unwrap();
    node.send("two").await.unwrap();
    node.disconnect().await.unwrap();

    assert_eq!(node.history(PEER_X).await.unwrap().len(), 2);
    assert_eq!(node.clear_history().await.unwrap(), 2);
    assert!(node.history(PEER_X).await.unwrap().is_empty());

    assert!(node.forget_peer(PEER_X).await.unwrap());
    assert!(!node.forget_peer(PEER_X).await.unwrap());
    assert!(node.known_peers().await.unwrap().is_empty());
    assert!(matches!(
        node.connect(PEER_X).await,
        Err(BluechatError::PeerNotFound { .. })
    ));
}

#[tokio::test]
async fn test_shutdown_releases_everything() {
    let radio = Arc::new(MockRadio::ideal());
    let (node, mut events) = create_node(&radio);
    let (link, _) = connect_ready(&node, &radio, &mut events, PEER_X, ADDRESS_X).await;
    node.host().await.unwrap();

    node.shutdown().await.unwrap();
    assert!(!node.is_hosting());
    assert!(!node.is_discovering());
    assert!(!radio.is_server_open());
    assert!(!radio.is_advertising());
    assert!(!radio.is_scanning());
    assert_eq!(radio.close_count(link), 1);
    assert!(radio.open_links().is_empty());
}
