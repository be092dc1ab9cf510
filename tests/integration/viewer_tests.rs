//! Viewer end-to-end tests.
//!
//! Tests verify:
//! - Received tiles are decoded, cached and drawn exactly
//! - Coarser cached tiles stand in for missing ones
//! - Tiles for unknown slots, inactive slides and undecodable payloads are dropped
//! - Switching slides and clearing the cache reset local tiles
//! - Server pushes (progress, slide created, rate limited) reach the store
//! - Malformed frames do not break the connection
//! - Missing tiles are re-requested and viewport updates are debounced

use std::time::Duration;

use bytes::Bytes;
use image::Rgba;
use tokio::time::Instant;

use wsi_tile_client::connection::ConnectionState;
use wsi_tile_client::error::{DecodeError, ProtocolError, ViewerError};
use wsi_tile_client::protocol::{Command, Frame, Progress, SlideCreated, SlideId};
use wsi_tile_client::render::RgbaSurface;
use wsi_tile_client::scheduler::CellKind;
use wsi_tile_client::viewer::ViewerEvent;

use super::test_utils::{
    assert_no_command, expect_command, jpeg_tile, png_tile, slide, test_config, tile_frame,
    viewport, within, Harness,
};

// =============================================================================
// Tiles
// =============================================================================

#[tokio::test]
async fn test_received_tiles_make_frame_exact() {
    let mut harness = Harness::start(test_config());
    let mut conn = harness.connect().await;
    let a = slide(1, 1024, 1024, 2);

    harness.open_slide(&mut conn, a, 0).await;
    harness.handle.activate(a.id).await.unwrap();
    harness
        .handle
        .set_viewport(a.id, viewport(0.0, 0.0, 1024.0, 1024.0, 1.0))
        .await
        .unwrap();
    assert!(matches!(
        expect_command(&mut conn).await,
        Command::UpdateViewport { slot: 0, .. }
    ));

    let frame = harness.handle.frame().await.unwrap();
    assert_eq!(frame.level, 0);
    assert_eq!(frame.cells.len(), 4);
    assert_eq!(frame.stats.placeholder, 4);

    for (column, row) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
        harness
            .deliver_tile(
                &conn,
                tile_frame(0, 0, column, row, jpeg_tile(32, 32, [40, 80, 120])),
            )
            .await;
    }

    let frame = harness.handle.frame().await.unwrap();
    assert_eq!(frame.stats.exact, 4);
    assert!(frame.cells.iter().all(|cell| cell.kind == CellKind::Exact));
    assert_eq!(frame.slide, Some(a.id));

    let mut store = harness.handle.subscribe();
    within(store.wait_for(|s| s.cached_tiles == 4))
        .await
        .unwrap();
    assert_eq!(harness.handle.snapshot().cache_bytes, 4 * 32 * 32 * 4);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_coarse_tile_fills_in_for_missing_ones() {
    let mut harness = Harness::start(test_config());
    let mut conn = harness.connect().await;
    let a = slide(1, 2048, 2048, 3);
    let color = [200, 10, 10, 255];

    harness.open_slide(&mut conn, a, 0).await;
    harness.handle.activate(a.id).await.unwrap();
    harness
        .handle
        .set_viewport(a.id, viewport(0.0, 0.0, 1024.0, 1024.0, 1.0))
        .await
        .unwrap();

    // Only the single level-2 tile arrives
    harness
        .deliver_tile(&conn, tile_frame(0, 2, 0, 0, png_tile(512, 512, color)))
        .await;

    let frame = harness.handle.frame().await.unwrap();
    assert_eq!(frame.level, 0);
    assert_eq!(frame.stats.fallback, 4);
    assert_eq!(frame.stats.exact, 0);

    let cell = frame
        .cells
        .iter()
        .find(|cell| cell.key.column == 1 && cell.key.row == 0)
        .unwrap();
    assert_eq!(cell.kind, CellKind::Fallback);
    let (record, src) = cell.tile.as_ref().unwrap();
    assert_eq!(record.key.level, 2);
    assert_eq!(src.x, 128.0);
    assert_eq!(src.y, 0.0);
    assert_eq!(src.width, 128.0);
    assert_eq!(cell.dst.x, 512.0);
    assert_eq!(cell.dst.width, 512.0);

    let mut surface = RgbaSurface::new(1024, 1024);
    frame.draw(&mut surface);
    assert_eq!(surface.image().get_pixel(600, 100), &Rgba(color));
    assert_eq!(surface.image().get_pixel(1000, 1000), &Rgba(color));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_tile_for_unknown_slot_is_dropped() {
    let mut harness = Harness::start(test_config());
    let mut conn = harness.connect().await;
    let a = slide(1, 1024, 1024, 2);

    harness.open_slide(&mut conn, a, 0).await;
    harness.handle.activate(a.id).await.unwrap();

    conn.send_frame(&tile_frame(5, 0, 0, 0, jpeg_tile(16, 16, [1, 2, 3])))
        .unwrap();
    harness
        .deliver_tile(&conn, tile_frame(0, 0, 1, 1, jpeg_tile(16, 16, [1, 2, 3])))
        .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let snapshot = harness.handle.snapshot();
    assert_eq!(snapshot.cached_tiles, 1);
    assert_eq!(snapshot.connection, ConnectionState::Connected);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_undecodable_tile_is_reported() {
    let mut harness = Harness::start(test_config());
    let mut conn = harness.connect().await;
    let a = slide(1, 1024, 1024, 2);

    harness.open_slide(&mut conn, a, 0).await;
    harness.handle.activate(a.id).await.unwrap();
    conn.send_frame(&tile_frame(
        0,
        0,
        1,
        0,
        Bytes::from_static(b"definitely not a jpeg"),
    ))
    .unwrap();

    let event = harness
        .next_event(|e| matches!(e, ViewerEvent::TileDecodeFailed { .. }))
        .await;
    match event {
        ViewerEvent::TileDecodeFailed { key, error } => {
            assert_eq!(key.slide, a.id);
            assert_eq!((key.level, key.column, key.row), (0, 1, 0));
            assert!(matches!(error, DecodeError::Image(_)));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(harness.handle.snapshot().cached_tiles, 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_background_slide_tiles_do_not_evict_active_ones() {
    let mut config = test_config();
    config.max_cached_tiles = 2;
    let mut harness = Harness::start(config);
    let mut conn = harness.connect().await;
    let a = slide(1, 1024, 512, 2);
    let b = slide(2, 1024, 512, 2);

    harness.open_slide(&mut conn, a, 0).await;
    harness.open_slide(&mut conn, b, 1).await;
    harness.handle.activate(a.id).await.unwrap();
    harness
        .handle
        .set_viewport(a.id, viewport(0.0, 0.0, 1024.0, 512.0, 1.0))
        .await
        .unwrap();

    for column in 0..2 {
        harness
            .deliver_tile(&conn, tile_frame(0, 0, column, 0, jpeg_tile(16, 16, [7, 7, 7])))
            .await;
    }
    assert_eq!(harness.handle.frame().await.unwrap().stats.exact, 2);

    // B is open but not shown; its tile must not push A's out
    conn.send_frame(&tile_frame(1, 0, 0, 0, jpeg_tile(16, 16, [8, 8, 8])))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.handle.snapshot().cached_tiles, 2);

    let frame = harness.handle.frame().await.unwrap();
    assert_eq!(frame.stats.exact, 2);
    assert_eq!(frame.stats.placeholder, 0);
    assert_eq!(frame.slide, Some(a.id));

    harness.shutdown().await;
}

// =============================================================================
// Cache resets
// =============================================================================

#[tokio::test]
async fn test_switching_slides_clears_tiles() {
    let mut harness = Harness::start(test_config());
    let mut conn = harness.connect().await;
    let a = slide(1, 1024, 1024, 2);
    let b = slide(2, 1024, 1024, 2);

    harness.open_slide(&mut conn, a, 0).await;
    harness.open_slide(&mut conn, b, 1).await;
    harness.handle.activate(a.id).await.unwrap();

    harness
        .deliver_tile(&conn, tile_frame(0, 0, 0, 0, jpeg_tile(16, 16, [5, 5, 5])))
        .await;
    let mut store = harness.handle.subscribe();
    within(store.wait_for(|s| s.cached_tiles == 1))
        .await
        .unwrap();

    harness.handle.activate(b.id).await.unwrap();
    within(store.wait_for(|s| s.cached_tiles == 0 && s.active == Some(b.id)))
        .await
        .unwrap();

    // Re-activating the current slide keeps its tiles
    harness
        .deliver_tile(&conn, tile_frame(1, 0, 0, 0, jpeg_tile(16, 16, [5, 5, 5])))
        .await;
    harness.handle.activate(b.id).await.unwrap();
    within(store.wait_for(|s| s.cached_tiles == 1))
        .await
        .unwrap();

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_clear_cache_asks_server_to_resend() {
    let mut harness = Harness::start(test_config());
    let mut conn = harness.connect().await;
    let a = slide(1, 50_000, 40_000, 8);
    let view = viewport(300.0, 400.0, 800.0, 600.0, 0.25);

    harness.open_slide(&mut conn, a, 6).await;
    harness.handle.set_viewport(a.id, view).await.unwrap();
    assert!(matches!(
        expect_command(&mut conn).await,
        Command::UpdateViewport { slot: 6, .. }
    ));

    harness.handle.clear_cache().await.unwrap();
    assert_eq!(expect_command(&mut conn).await, Command::ClearCache { slot: 6 });
    match expect_command(&mut conn).await {
        Command::UpdateViewport { slot, viewport } => {
            assert_eq!(slot, 6);
            assert_eq!(viewport.x, 300.0);
            assert_eq!(viewport.zoom, 0.25);
        }
        other => panic!("expected UpdateViewport, got {:?}", other),
    }
    assert_no_command(&mut conn).await;

    harness.shutdown().await;
}

// =============================================================================
// Server pushes
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_server_pushes_reach_store() {
    let mut harness = Harness::start(test_config());
    let conn = harness.connect().await;
    let id = SlideId::from_bytes([42; 16]);

    conn.send_frame(&Frame::Progress(Progress {
        slide_id: id,
        steps_completed: 3,
        steps_total: 10,
    }))
    .unwrap();
    conn.send_frame(&Frame::SlideCreated(SlideCreated {
        id,
        width: 90_000,
        height: 70_000,
        filename: "biopsy-17.svs".to_string(),
        size_bytes: 1_234_567,
        url: "https://slides.example/biopsy-17.svs".to_string(),
    }))
    .unwrap();
    conn.send_frame(&Frame::RateLimited).unwrap();

    let event = harness
        .next_event(|e| matches!(e, ViewerEvent::Progress(_)))
        .await;
    assert!(matches!(event, ViewerEvent::Progress(p) if p.steps_completed == 3));
    harness
        .next_event(|e| matches!(e, ViewerEvent::RateLimited))
        .await;

    let mut store = harness.handle.subscribe();
    let snapshot = within(store.wait_for(|s| s.rate_limited == 1))
        .await
        .unwrap()
        .clone();

    let progress = snapshot.progress_for(&id).unwrap();
    assert_eq!(progress.steps_total, 10);
    assert!((progress.fraction() - 0.3).abs() < 1e-9);
    assert_eq!(snapshot.created.len(), 1);
    assert_eq!(snapshot.created[0].filename, "biopsy-17.svs");
    assert_eq!(snapshot.created[0].size_bytes, 1_234_567);

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frame_keeps_connection() {
    let mut harness = Harness::start(test_config());
    let conn = harness.connect().await;

    conn.send_raw(Bytes::from_static(&[9, 0, 1])).unwrap();
    let event = harness
        .next_event(|e| matches!(e, ViewerEvent::ProtocolError(_)))
        .await;
    assert!(matches!(
        event,
        ViewerEvent::ProtocolError(ProtocolError::UnsupportedVersion(9))
    ));

    // Later frames still get through
    conn.send_frame(&Frame::RateLimited).unwrap();
    harness
        .next_event(|e| matches!(e, ViewerEvent::RateLimited))
        .await;
    assert_eq!(
        harness.handle.snapshot().connection,
        ConnectionState::Connected
    );
    assert_eq!(harness.server.attempts(), 1);

    harness.shutdown().await;
}

// =============================================================================
// Timing
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_missing_tile_is_re_requested() {
    let mut harness = Harness::start(test_config());
    let mut conn = harness.connect().await;
    let a = slide(1, 512, 512, 1);

    harness.open_slide(&mut conn, a, 2).await;
    harness.handle.activate(a.id).await.unwrap();

    let start = Instant::now();
    harness
        .handle
        .set_viewport(a.id, viewport(0.0, 0.0, 512.0, 512.0, 1.0))
        .await
        .unwrap();
    assert!(matches!(
        expect_command(&mut conn).await,
        Command::UpdateViewport { slot: 2, .. }
    ));

    assert_eq!(
        expect_command(&mut conn).await,
        Command::RequestTile {
            slot: 2,
            column: 0,
            row: 0,
            level: 0
        }
    );
    assert!(start.elapsed() >= Duration::from_secs(3));

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_viewport_updates_are_debounced() {
    let mut config = test_config();
    config.viewport_debounce = Duration::from_millis(150);
    let mut harness = Harness::start(config);
    let mut conn = harness.connect().await;
    let a = slide(1, 50_000, 40_000, 8);

    harness.open_slide(&mut conn, a, 0).await;

    for i in 0..10 {
        harness
            .handle
            .set_viewport(a.id, viewport(f64::from(i) * 10.0, 0.0, 800.0, 600.0, 0.1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let last = Instant::now();

    match expect_command(&mut conn).await {
        Command::UpdateViewport { slot, viewport } => {
            assert_eq!(slot, 0);
            assert_eq!(viewport.x, 90.0);
        }
        other => panic!("expected UpdateViewport, got {:?}", other),
    }
    assert!(last.elapsed() >= Duration::from_millis(130));
    assert_no_command(&mut conn).await;

    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_active_viewport_renders_before_debounce() {
    let mut harness = Harness::start(test_config());
    let mut conn = harness.connect().await;
    let a = slide(1, 50_000, 40_000, 8);

    harness.open_slide(&mut conn, a, 0).await;
    harness.handle.activate(a.id).await.unwrap();
    let before = harness.handle.frame().await.unwrap();
    assert!(before.cells.is_empty());

    harness
        .handle
        .set_viewport(a.id, viewport(0.0, 0.0, 800.0, 600.0, 0.1))
        .await
        .unwrap();
    let floor = before.generation;
    harness
        .next_event(
            |e| matches!(e, ViewerEvent::RenderRequested { generation } if *generation > floor),
        )
        .await;

    // The frame follows the new viewport right away
    let frame = harness.handle.frame().await.unwrap();
    assert!(frame.generation > before.generation);
    assert_eq!(frame.level, 3);
    assert!(!frame.cells.is_empty());

    harness.shutdown().await;
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_handle_fails_after_shutdown() {
    let harness = Harness::start(test_config());
    let handle = harness.handle.clone();
    harness.shutdown().await;

    assert!(matches!(
        handle.open(slide(1, 100, 100, 1)).await,
        Err(ViewerError::Stopped)
    ));
    assert!(matches!(handle.frame().await, Err(ViewerError::Stopped)));
}
