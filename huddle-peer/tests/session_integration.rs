//! End-to-end session tests: a real relay, real sessions, real channels.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use huddle_peer::protocol::{
    CodeAction, DrawingAction, DrawingKind, Point, TimerAction, TimerMode,
};
use huddle_peer::reconnect::ReconnectPolicy;
use huddle_peer::server::{RelayConfig, RelayServer};
use huddle_peer::session::{PeerSession, SessionCallbacks, SessionConfig, SessionError};
use huddle_peer::ParticipantId;

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a relay on a free port, return its URL and the server task.
async fn start_test_relay() -> (String, tokio::task::JoinHandle<()>) {
    let port = free_port().await;
    let config = RelayConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        ..RelayConfig::default()
    };
    let server = RelayServer::new(config);
    let task = tokio::spawn(async move {
        server.run().await.unwrap();
    });
    // Give the relay time to bind
    sleep(Duration::from_millis(50)).await;
    (format!("ws://127.0.0.1:{port}"), task)
}

fn test_session(relay_url: &str) -> PeerSession {
    PeerSession::new(SessionConfig {
        reconnect: ReconnectPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(50),
        },
        ..SessionConfig::with_relay(relay_url)
    })
}

/// Let an init's asynchronous relay registration land before the next
/// session's discovery pass runs. Discovery is a best-effort snapshot;
/// a peer registering concurrently with it relies on its own pass.
async fn settle() {
    sleep(Duration::from_millis(100)).await;
}

/// Captured callback events for assertions.
struct Events {
    connections: mpsc::UnboundedReceiver<ParticipantId>,
    disconnections: mpsc::UnboundedReceiver<ParticipantId>,
    drawings: mpsc::UnboundedReceiver<(DrawingAction, ParticipantId)>,
    codes: mpsc::UnboundedReceiver<(CodeAction, ParticipantId)>,
    timers: mpsc::UnboundedReceiver<(TimerAction, ParticipantId)>,
    errors: mpsc::UnboundedReceiver<SessionError>,
}

fn capture_callbacks() -> (SessionCallbacks, Events) {
    let (conn_tx, connections) = mpsc::unbounded_channel();
    let (disc_tx, disconnections) = mpsc::unbounded_channel();
    let (draw_tx, drawings) = mpsc::unbounded_channel();
    let (code_tx, codes) = mpsc::unbounded_channel();
    let (timer_tx, timers) = mpsc::unbounded_channel();
    let (err_tx, errors) = mpsc::unbounded_channel();

    let callbacks = SessionCallbacks {
        on_connection: Box::new(move |id| {
            let _ = conn_tx.send(id.clone());
        }),
        on_disconnection: Box::new(move |id| {
            let _ = disc_tx.send(id.clone());
        }),
        on_drawing_action: Box::new(move |action, from| {
            let _ = draw_tx.send((action, from.clone()));
        }),
        on_code_action: Some(Box::new(move |action, from| {
            let _ = code_tx.send((action, from.clone()));
        })),
        on_timer_action: Some(Box::new(move |action, from| {
            let _ = timer_tx.send((action, from.clone()));
        })),
        on_session_error: Some(Box::new(move |e| {
            let _ = err_tx.send(e);
        })),
    };
    (
        callbacks,
        Events {
            connections,
            disconnections,
            drawings,
            codes,
            timers,
            errors,
        },
    )
}

#[tokio::test]
async fn test_two_sessions_discover_each_other() {
    let (url, _relay) = start_test_relay().await;

    let alice = test_session(&url);
    let (cb_a, mut events_a) = capture_callbacks();
    let alice_id = alice.init("room1", cb_a).await.unwrap();
    settle().await;

    let bob = test_session(&url);
    let (cb_b, mut events_b) = capture_callbacks();
    let bob_id = bob.init("room1", cb_b).await.unwrap();

    // Each side learns about the other within one discovery pass.
    let seen_by_alice = timeout(Duration::from_secs(2), events_a.connections.recv())
        .await
        .expect("alice should see bob")
        .unwrap();
    assert_eq!(seen_by_alice, bob_id);

    let seen_by_bob = timeout(Duration::from_secs(2), events_b.connections.recv())
        .await
        .expect("bob should see alice")
        .unwrap();
    assert_eq!(seen_by_bob, alice_id);

    assert_eq!(alice.connected_peers().await, vec![bob_id]);
    assert_eq!(bob.connected_peers().await, vec![alice_id]);
    assert!(alice.is_connected().await);
    assert!(bob.is_connected().await);
}

#[tokio::test]
async fn test_drawing_action_delivered_exactly() {
    let (url, _relay) = start_test_relay().await;

    let alice = test_session(&url);
    let (cb_a, mut events_a) = capture_callbacks();
    let alice_id = alice.init("room1", cb_a).await.unwrap();
    settle().await;

    let bob = test_session(&url);
    let (cb_b, mut events_b) = capture_callbacks();
    bob.init("room1", cb_b).await.unwrap();

    timeout(Duration::from_secs(2), events_a.connections.recv())
        .await
        .unwrap();
    timeout(Duration::from_secs(2), events_b.connections.recv())
        .await
        .unwrap();

    let mut sent = DrawingAction::new(DrawingKind::Draw);
    sent.current_position = Some(Point { x: 10.0, y: 20.0 });
    alice.send_drawing_action(sent.clone()).await;

    let (received, from) = timeout(Duration::from_secs(2), events_b.drawings.recv())
        .await
        .expect("bob should receive the drawing action")
        .unwrap();
    assert_eq!(received, sent, "drawing actions are not stamped or altered");
    assert_eq!(from, alice_id);
}

#[tokio::test]
async fn test_code_action_stamped_with_sender() {
    let (url, _relay) = start_test_relay().await;

    let alice = test_session(&url);
    let (cb_a, mut events_a) = capture_callbacks();
    let alice_id = alice.init("room1", cb_a).await.unwrap();
    settle().await;

    let bob = test_session(&url);
    let (cb_b, mut events_b) = capture_callbacks();
    bob.init("room1", cb_b).await.unwrap();

    timeout(Duration::from_secs(2), events_a.connections.recv())
        .await
        .unwrap();
    timeout(Duration::from_secs(2), events_b.connections.recv())
        .await
        .unwrap();

    alice.send_code_action(CodeAction::change("let x = 1;")).await;

    let (received, _) = timeout(Duration::from_secs(2), events_b.codes.recv())
        .await
        .expect("bob should receive the code action")
        .unwrap();
    assert_eq!(received.content.as_deref(), Some("let x = 1;"));
    assert_eq!(received.sender_id, Some(alice_id));
}

#[tokio::test]
async fn test_timer_handler_single_slot() {
    let (url, _relay) = start_test_relay().await;

    let alice = test_session(&url);
    let (cb_a, mut events_a) = capture_callbacks();
    alice.init("room1", cb_a).await.unwrap();
    settle().await;

    let bob = test_session(&url);
    let (cb_b, mut events_b) = capture_callbacks();
    bob.init("room1", cb_b).await.unwrap();

    timeout(Duration::from_secs(2), events_a.connections.recv())
        .await
        .unwrap();
    timeout(Duration::from_secs(2), events_b.connections.recv())
        .await
        .unwrap();

    // Replace bob's seeded timer handler with an override.
    let (override_tx, mut override_rx) = mpsc::unbounded_channel();
    bob.register_timer_action_handler(Box::new(move |action, _| {
        let _ = override_tx.send(action);
    }))
    .await;

    alice
        .send_timer_action(TimerAction::start(1_700_000_000_000, 0, TimerMode::Countup))
        .await;

    let received = timeout(Duration::from_secs(2), override_rx.recv())
        .await
        .expect("override handler should receive the timer action")
        .unwrap();
    assert_eq!(received.start_time, Some(1_700_000_000_000));
    // The seeded handler was replaced, not layered under.
    assert!(events_b.timers.try_recv().is_err());

    // After unregistering, timer actions drop.
    bob.unregister_timer_action_handler().await;
    alice.send_timer_action(TimerAction::reset()).await;
    assert!(
        timeout(Duration::from_millis(300), override_rx.recv())
            .await
            .is_err(),
        "no handler should fire after unregistration"
    );
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let (url, _relay) = start_test_relay().await;

    let alice = test_session(&url);
    let (cb_a, _events_a) = capture_callbacks();
    alice.init("ABC", cb_a).await.unwrap();
    settle().await;

    let bob = test_session(&url);
    let (cb_b, _events_b) = capture_callbacks();
    bob.init("XYZ", cb_b).await.unwrap();

    // Both discovery passes have long finished by now.
    sleep(Duration::from_millis(400)).await;

    assert!(alice.connected_peers().await.is_empty());
    assert!(bob.connected_peers().await.is_empty());
    assert!(!alice.is_connected().await);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let (url, _relay) = start_test_relay().await;

    let alice = test_session(&url);
    let (cb_a, mut events_a) = capture_callbacks();
    let alice_id = alice.init("room1", cb_a).await.unwrap();
    settle().await;

    let bob = test_session(&url);
    let (cb_b, mut events_b) = capture_callbacks();
    bob.init("room1", cb_b).await.unwrap();

    timeout(Duration::from_secs(2), events_a.connections.recv())
        .await
        .unwrap();
    timeout(Duration::from_secs(2), events_b.connections.recv())
        .await
        .unwrap();

    alice.disconnect().await;
    assert!(alice.connected_peers().await.is_empty());
    assert!(!alice.is_connected().await);

    // Second disconnect is a no-op, not an error.
    alice.disconnect().await;
    assert!(alice.connected_peers().await.is_empty());

    // Bob observes the drop and his registry empties too.
    let gone = timeout(Duration::from_secs(2), events_b.disconnections.recv())
        .await
        .expect("bob should observe alice leaving")
        .unwrap();
    assert_eq!(gone, alice_id);
    sleep(Duration::from_millis(100)).await;
    assert!(bob.connected_peers().await.is_empty());
}

#[tokio::test]
async fn test_relay_loss_exhausts_reconnection() {
    let (url, relay_task) = start_test_relay().await;

    let alice = test_session(&url);
    let (cb_a, mut events_a) = capture_callbacks();
    alice.init("room1", cb_a).await.unwrap();
    settle().await;

    let bob = test_session(&url);
    let (cb_b, mut events_b) = capture_callbacks();
    let bob_id = bob.init("room1", cb_b).await.unwrap();

    timeout(Duration::from_secs(2), events_a.connections.recv())
        .await
        .unwrap();
    timeout(Duration::from_secs(2), events_b.connections.recv())
        .await
        .unwrap();

    // Kill the relay: registrations drop, reconnection runs its bounded
    // schedule against a dead endpoint.
    relay_task.abort();

    let error = timeout(Duration::from_secs(5), events_a.errors.recv())
        .await
        .expect("alice should be told reconnection gave up")
        .unwrap();
    assert!(matches!(
        error,
        SessionError::ReconnectExhausted { attempts: 2 }
    ));

    // Exactly one notification, even if more time passes.
    assert!(
        timeout(Duration::from_millis(500), events_a.errors.recv())
            .await
            .is_err(),
        "no second exhaustion notification"
    );

    // Established direct channels do not depend on the relay.
    assert_eq!(alice.connected_peers().await, vec![bob_id]);
}
