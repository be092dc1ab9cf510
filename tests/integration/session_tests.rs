//! Session and slot mapping integration tests.
//!
//! Tests verify:
//! - A slot assignment triggers an immediate viewport push
//! - Slot exhaustion, client side and server side
//! - Server-initiated slot reassignment
//! - Close releases the slot, including slots assigned after close
//! - Server rejections surface as session failures

use std::time::Duration;

use tokio::time::Instant;

use wsi_tile_client::error::{SessionError, ViewerError};
use wsi_tile_client::protocol::{Command, ErrorCode, Frame};
use wsi_tile_client::session::{OpenOutcome, SlotState};
use wsi_tile_client::viewer::ViewerEvent;

use super::test_utils::{
    assert_no_command, expect_command, jpeg_tile, slide, test_config, tile_frame, viewport,
    Harness,
};

// =============================================================================
// Opening
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_open_response_pushes_viewport_immediately() {
    let mut harness = Harness::start(test_config());
    let mut conn = harness.connect().await;
    let a = slide(1, 50_000, 40_000, 8);

    assert_eq!(
        harness.handle.open(a).await.unwrap(),
        OpenOutcome::Requested
    );
    assert!(matches!(
        expect_command(&mut conn).await,
        Command::Open { .. }
    ));

    // Set while pending: held until a slot exists
    harness
        .handle
        .set_viewport(a.id, viewport(100.0, 200.0, 1024.0, 768.0, 0.05))
        .await
        .unwrap();
    assert_no_command(&mut conn).await;

    conn.send_frame(&Frame::OpenResponse { slot: 4, id: a.id })
        .unwrap();
    let start = Instant::now();
    match expect_command(&mut conn).await {
        Command::UpdateViewport { slot, viewport } => {
            assert_eq!(slot, 4);
            assert_eq!(viewport.x, 100.0);
            assert_eq!(viewport.y, 200.0);
            assert_eq!(viewport.width, 1024);
            assert_eq!(viewport.height, 768);
        }
        other => panic!("expected UpdateViewport, got {:?}", other),
    }
    assert!(start.elapsed() < Duration::from_millis(20));

    // Sent once, not again when the debounce would have fired
    assert_no_command(&mut conn).await;
    assert_eq!(
        harness.handle.current_slot(a.id).await.unwrap(),
        Some(SlotState::Assigned(4))
    );

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reopen_is_idempotent() {
    let mut harness = Harness::start(test_config());
    let mut conn = harness.connect().await;
    let a = slide(1, 1000, 1000, 2);

    harness.open_slide(&mut conn, a, 0).await;
    assert_eq!(
        harness.handle.open(a).await.unwrap(),
        OpenOutcome::Existing(SlotState::Assigned(0))
    );
    assert_no_command(&mut conn).await;

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_client_side_slot_exhaustion() {
    let mut config = test_config();
    config.max_slots = 2;
    let mut harness = Harness::start(config);
    let mut conn = harness.connect().await;

    harness
        .open_slide(&mut conn, slide(1, 1000, 1000, 2), 0)
        .await;
    harness
        .open_slide(&mut conn, slide(2, 1000, 1000, 2), 1)
        .await;

    let result = harness.handle.open(slide(3, 1000, 1000, 2)).await;
    assert!(matches!(
        result,
        Err(ViewerError::Session(SessionError::Exhausted { capacity: 2 }))
    ));
    assert_no_command(&mut conn).await;

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_server_side_slot_exhaustion() {
    let mut harness = Harness::start(test_config());
    let mut conn = harness.connect().await;
    let a = slide(1, 1000, 1000, 2);

    harness.handle.open(a).await.unwrap();
    expect_command(&mut conn).await;

    conn.send_frame(&Frame::Error {
        code: ErrorCode::SlotsExhausted,
        id: None,
        message: "no free slots".to_string(),
    })
    .unwrap();

    let event = harness
        .next_event(|e| matches!(e, ViewerEvent::SessionFailed { .. }))
        .await;
    match event {
        ViewerEvent::SessionFailed { id, error } => {
            assert_eq!(id, a.id);
            assert!(matches!(error, SessionError::Exhausted { .. }));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(harness.handle.current_slot(a.id).await.unwrap(), None);
    assert!(harness.handle.snapshot().sessions.is_empty());

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_server_rejects_unknown_slide() {
    let mut harness = Harness::start(test_config());
    let mut conn = harness.connect().await;
    let a = slide(1, 1000, 1000, 2);
    let b = slide(2, 1000, 1000, 2);

    harness.handle.open(a).await.unwrap();
    harness.handle.open(b).await.unwrap();
    expect_command(&mut conn).await;
    expect_command(&mut conn).await;

    conn.send_frame(&Frame::Error {
        code: ErrorCode::UnknownSlide,
        id: Some(b.id),
        message: "no such slide".to_string(),
    })
    .unwrap();

    let event = harness
        .next_event(|e| matches!(e, ViewerEvent::SessionFailed { .. }))
        .await;
    match event {
        ViewerEvent::SessionFailed {
            id,
            error: SessionError::Rejected { message, .. },
        } => {
            assert_eq!(id, b.id);
            assert_eq!(message, "no such slide");
        }
        other => panic!("unexpected event {:?}", other),
    }

    // The other pending session is untouched
    assert_eq!(
        harness.handle.current_slot(a.id).await.unwrap(),
        Some(SlotState::Pending)
    );
    assert_eq!(harness.handle.current_slot(b.id).await.unwrap(), None);

    harness.shutdown().await;
}

// =============================================================================
// Reassignment
// =============================================================================

#[tokio::test]
async fn test_slot_reassignment_moves_session() {
    let mut harness = Harness::start(test_config());
    let mut conn = harness.connect().await;
    let a = slide(1, 50_000, 40_000, 8);

    harness.open_slide(&mut conn, a, 3).await;
    harness.handle.activate(a.id).await.unwrap();
    harness
        .handle
        .set_viewport(a.id, viewport(0.0, 0.0, 800.0, 600.0, 0.1))
        .await
        .unwrap();
    match expect_command(&mut conn).await {
        Command::UpdateViewport { slot, .. } => assert_eq!(slot, 3),
        other => panic!("expected UpdateViewport, got {:?}", other),
    }

    conn.send_frame(&Frame::SlotReassigned {
        id: a.id,
        old_slot: 3,
        new_slot: 7,
    })
    .unwrap();

    // The server hears the viewport again on the new slot
    match expect_command(&mut conn).await {
        Command::UpdateViewport { slot, viewport } => {
            assert_eq!(slot, 7);
            assert_eq!(viewport.width, 800);
        }
        other => panic!("expected UpdateViewport, got {:?}", other),
    }
    assert_eq!(
        harness.handle.current_slot(a.id).await.unwrap(),
        Some(SlotState::Assigned(7))
    );

    // Tiles on the new slot belong to the slide; the old slot is dead
    conn.send_frame(&tile_frame(3, 2, 0, 0, jpeg_tile(16, 16, [9, 9, 9])))
        .unwrap();
    conn.send_frame(&tile_frame(7, 2, 1, 1, jpeg_tile(16, 16, [9, 9, 9])))
        .unwrap();
    let event = harness
        .next_event(|e| matches!(e, ViewerEvent::TileReady(_)))
        .await;
    match event {
        ViewerEvent::TileReady(key) => {
            assert_eq!(key.slide, a.id);
            assert_eq!((key.level, key.column, key.row), (2, 1, 1));
        }
        other => panic!("unexpected event {:?}", other),
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.handle.snapshot().cached_tiles, 1);

    harness.shutdown().await;
}

// =============================================================================
// Closing
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_close_releases_slot() {
    let mut harness = Harness::start(test_config());
    let mut conn = harness.connect().await;
    let a = slide(1, 1000, 1000, 2);

    harness.open_slide(&mut conn, a, 2).await;
    assert_eq!(harness.handle.close(a.id).await.unwrap(), Some(2));
    assert_eq!(expect_command(&mut conn).await, Command::Close { slot: 2 });

    let event = harness
        .next_event(|e| matches!(e, ViewerEvent::SessionClosed { .. }))
        .await;
    assert!(matches!(
        event,
        ViewerEvent::SessionClosed { slot: Some(2), .. }
    ));
    assert_eq!(harness.handle.current_slot(a.id).await.unwrap(), None);

    // Closing again is an error
    assert!(matches!(
        harness.handle.close(a.id).await,
        Err(ViewerError::Session(SessionError::NotOpen(_)))
    ));

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_late_open_response_is_released() {
    let mut harness = Harness::start(test_config());
    let mut conn = harness.connect().await;
    let a = slide(1, 1000, 1000, 2);

    harness.handle.open(a).await.unwrap();
    expect_command(&mut conn).await;

    // Closed while pending: nothing to release yet
    assert_eq!(harness.handle.close(a.id).await.unwrap(), None);
    assert_no_command(&mut conn).await;

    conn.send_frame(&Frame::OpenResponse { slot: 9, id: a.id })
        .unwrap();
    assert_eq!(expect_command(&mut conn).await, Command::Close { slot: 9 });

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unknown_slide_operations_fail() {
    let mut harness = Harness::start(test_config());
    let _conn = harness.connect().await;
    let a = slide(1, 1000, 1000, 2);

    assert!(matches!(
        harness.handle.activate(a.id).await,
        Err(ViewerError::Session(SessionError::NotOpen(_)))
    ));
    assert!(matches!(
        harness
            .handle
            .set_viewport(a.id, viewport(0.0, 0.0, 10.0, 10.0, 1.0))
            .await,
        Err(ViewerError::Session(SessionError::NotOpen(_)))
    ));

    harness.shutdown().await;
}
