//! Connection lifecycle integration tests.
//!
//! Tests verify:
//! - State transitions are published to the store and the event stream
//! - Exponential backoff between failed attempts
//! - Connect timeout and attempt limits
//! - Reconnect replays every open session before any other command
//! - Explicit disconnect stays disconnected

use std::time::Duration;

use tokio::time::Instant;

use wsi_tile_client::connection::ConnectionState;
use wsi_tile_client::protocol::{Command, Frame};
use wsi_tile_client::viewer::ViewerEvent;

use super::test_utils::{expect_command, slide, test_config, viewport, within, Harness};

// =============================================================================
// State publication
// =============================================================================

#[tokio::test]
async fn test_connect_publishes_states() {
    let mut harness = Harness::start(test_config());
    assert_eq!(
        harness.handle.snapshot().connection,
        ConnectionState::Disconnected
    );

    let _conn = harness.connect().await;

    let connecting = harness
        .next_event(|e| matches!(e, ViewerEvent::ConnectionChanged { .. }))
        .await;
    assert!(matches!(
        connecting,
        ViewerEvent::ConnectionChanged {
            state: ConnectionState::Connecting,
            diagnostic: None
        }
    ));
    let connected = harness
        .next_event(|e| matches!(e, ViewerEvent::ConnectionChanged { .. }))
        .await;
    assert!(matches!(
        connected,
        ViewerEvent::ConnectionChanged {
            state: ConnectionState::Connected,
            ..
        }
    ));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_lost_connection_reports_diagnostic() {
    let mut harness = Harness::start(test_config());
    let mut conn = harness.connect().await;

    conn.close();
    let event = harness
        .next_event(|e| {
            matches!(
                e,
                ViewerEvent::ConnectionChanged {
                    state: ConnectionState::Disconnected,
                    ..
                }
            )
        })
        .await;
    match event {
        ViewerEvent::ConnectionChanged { diagnostic, .. } => {
            assert!(diagnostic.unwrap().contains("closed"));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(harness.handle.snapshot().diagnostic.is_some());

    // Comes back on its own
    let _conn = within(harness.server.accept()).await.unwrap();
    harness.wait_for_state(ConnectionState::Connected).await;

    harness.shutdown().await;
}

// =============================================================================
// Retry policy
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_between_attempts() {
    let mut config = test_config();
    config.reconnect.base_delay = Duration::from_millis(500);
    config.reconnect.max_delay = Duration::from_secs(30);
    let mut harness = Harness::start(config);
    harness.server.refuse_next(3);

    let start = Instant::now();
    harness.handle.connect().await.unwrap();
    let _conn = within(harness.server.accept()).await.unwrap();

    // 500 + 1000 + 2000 ms of backoff before the fourth attempt
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(3500), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(3600), "{:?}", elapsed);
    assert_eq!(harness.server.attempts(), 4);

    harness.wait_for_state(ConnectionState::Connected).await;
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_backoff_is_capped() {
    let mut config = test_config();
    config.reconnect.base_delay = Duration::from_secs(1);
    config.reconnect.max_delay = Duration::from_secs(2);
    let mut harness = Harness::start(config);
    harness.server.refuse_next(4);

    let start = Instant::now();
    harness.handle.connect().await.unwrap();
    let _conn = within(harness.server.accept()).await.unwrap();

    // 1 + 2 + 2 + 2 seconds
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(7), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(7100), "{:?}", elapsed);

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_counts_as_failure() {
    let mut config = test_config();
    config.reconnect.connect_timeout = Duration::from_secs(2);
    let mut harness = Harness::start(config);
    harness.server.stall_next(1);

    harness.handle.connect().await.unwrap();
    harness.wait_for_state(ConnectionState::Error).await;
    let diagnostic = harness.handle.snapshot().diagnostic.clone().unwrap();
    assert!(diagnostic.contains("timed out"), "{}", diagnostic);

    let _conn = within(harness.server.accept()).await.unwrap();
    harness.wait_for_state(ConnectionState::Connected).await;
    assert_eq!(harness.server.attempts(), 2);

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_attempt_limit_leaves_error_state() {
    let mut config = test_config();
    config.reconnect.max_attempts = 2;
    let harness = Harness::start(config);
    harness.server.refuse_next(100);

    harness.handle.connect().await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(harness.server.attempts(), 2);
    assert_eq!(harness.handle.snapshot().connection, ConnectionState::Error);

    // An explicit connect starts over
    harness.server.refuse_next(0);
    harness.handle.connect().await.unwrap();
    harness.wait_for_state(ConnectionState::Connected).await;
    assert_eq!(harness.server.attempts(), 3);

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stays_disconnected() {
    let mut harness = Harness::start(test_config());
    let mut conn = harness.connect().await;

    harness.handle.disconnect().await.unwrap();
    harness.wait_for_state(ConnectionState::Disconnected).await;
    assert!(within(conn.recv_command()).await.is_none());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.server.attempts(), 1);
    assert_eq!(
        harness.handle.snapshot().connection,
        ConnectionState::Disconnected
    );

    harness.shutdown().await;
}

// =============================================================================
// Reconnect replay
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_reconnect_replays_sessions() {
    let mut harness = Harness::start(test_config());
    let mut conn = harness.connect().await;

    let a = slide(1, 10_000, 10_000, 5);
    let b = slide(2, 20_000, 20_000, 6);
    harness.open_slide(&mut conn, a, 0).await;
    harness.open_slide(&mut conn, b, 1).await;

    let view_a = viewport(0.0, 0.0, 800.0, 600.0, 0.1);
    harness.handle.set_viewport(a.id, view_a).await.unwrap();
    match expect_command(&mut conn).await {
        Command::UpdateViewport { slot, .. } => assert_eq!(slot, 0),
        other => panic!("expected UpdateViewport, got {:?}", other),
    }

    conn.close();
    let mut conn = within(harness.server.accept()).await.unwrap();

    // Exactly the two sessions, in open order, before anything else
    let first = expect_command(&mut conn).await;
    let second = expect_command(&mut conn).await;
    match (first, second) {
        (Command::Open { image: first, .. }, Command::Open { image: second, .. }) => {
            assert_eq!(first.id, a.id);
            assert_eq!(second.id, b.id);
        }
        other => panic!("expected two Opens, got {:?}", other),
    }
    assert!(conn.try_recv_command().is_none());

    // New slots; the remembered viewport follows the new assignment
    conn.send_frame(&Frame::OpenResponse { slot: 5, id: a.id })
        .unwrap();
    match expect_command(&mut conn).await {
        Command::UpdateViewport { slot, viewport } => {
            assert_eq!(slot, 5);
            assert_eq!(viewport.zoom, 0.1);
            assert_eq!(viewport.width, 800);
        }
        other => panic!("expected UpdateViewport, got {:?}", other),
    }

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_first_connect_flushes_deferred_opens() {
    let mut harness = Harness::start(test_config());
    let a = slide(1, 1000, 1000, 2);

    // Opened while offline: remembered, not lost
    harness.handle.open(a).await.unwrap();
    let mut conn = harness.connect().await;

    match expect_command(&mut conn).await {
        Command::Open { image, dpi } => {
            assert_eq!(image, a);
            assert_eq!(dpi, 96.0);
        }
        other => panic!("expected Open, got {:?}", other),
    }
    assert!(conn.try_recv_command().is_none());

    harness.shutdown().await;
}
