//! Test utilities for integration tests.
//!
//! This module provides an in-process tile server harness over the memory
//! transport and helpers for building tile payloads.

use std::future::Future;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use wsi_tile_client::connection::ConnectionState;
use wsi_tile_client::protocol::{Command, Frame, ImageDescriptor, SlideId, Slot};
use wsi_tile_client::transport::{memory_channel, MemoryServer, ServerConnection};
use wsi_tile_client::viewer::{Viewer, ViewerConfig, ViewerEvent, ViewerHandle};
use wsi_tile_client::viewport::ViewportState;

pub const ENDPOINT: &str = "mem://tiles";

/// Upper bound for anything a test waits on. Generous because paused-clock
/// tests advance through backoff delays inside it.
const WAIT_LIMIT: Duration = Duration::from_secs(60);

// =============================================================================
// Waiting
// =============================================================================

/// Await `future`, failing the test if it takes longer than [`WAIT_LIMIT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT_LIMIT, future)
        .await
        .expect("timed out waiting")
}

/// Next command the client sent on `conn`.
pub async fn expect_command(conn: &mut ServerConnection) -> Command {
    within(conn.recv_command())
        .await
        .expect("client closed the connection")
        .expect("client sent a malformed command")
}

/// Give the client a moment, then check it sent nothing.
pub async fn assert_no_command(conn: &mut ServerConnection) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    if let Some(command) = conn.try_recv_command() {
        panic!("unexpected command {:?}", command);
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Viewer settings tuned for tests: short debounce and reconnect delay.
pub fn test_config() -> ViewerConfig {
    let mut config = ViewerConfig::new(ENDPOINT);
    config.viewport_debounce = Duration::from_millis(20);
    config.reconnect.base_delay = Duration::from_millis(50);
    config.reconnect.max_delay = Duration::from_secs(1);
    config
}

pub fn slide(n: u8, width: u32, height: u32, levels: u32) -> ImageDescriptor {
    ImageDescriptor::new(SlideId::from_bytes([n; 16]), width, height, levels)
}

pub fn viewport(x: f64, y: f64, width: f64, height: f64, zoom: f64) -> ViewportState {
    ViewportState::new(x, y, width, height, zoom)
}

pub fn tile_frame(slot: Slot, level: u32, column: u32, row: u32, data: Bytes) -> Frame {
    Frame::Tile {
        slot,
        column,
        row,
        level,
        data,
    }
}

/// Solid-color JPEG payload.
pub fn jpeg_tile(width: u32, height: u32, color: [u8; 3]) -> Bytes {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, 90)
        .encode_image(&img)
        .unwrap();
    Bytes::from(buf)
}

/// Solid-color PNG payload. Lossless, so pixels can be compared exactly.
pub fn png_tile(width: u32, height: u32, color: [u8; 4]) -> Bytes {
    let img = RgbaImage::from_pixel(width, height, Rgba(color));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    Bytes::from(buf.into_inner())
}

// =============================================================================
// Harness
// =============================================================================

/// A running viewer wired to an in-process server.
pub struct Harness {
    pub handle: ViewerHandle,
    pub server: MemoryServer,
    pub events: broadcast::Receiver<ViewerEvent>,
    task: JoinHandle<()>,
}

impl Harness {
    pub fn start(config: ViewerConfig) -> Self {
        let (connector, server) = memory_channel();
        let (task, handle) = Viewer::spawn(config, Arc::new(connector));
        let events = handle.events();
        Self {
            handle,
            server,
            events,
            task,
        }
    }

    /// Connect and return the server end once the client reports connected.
    pub async fn connect(&mut self) -> ServerConnection {
        self.handle.connect().await.unwrap();
        let conn = within(self.server.accept())
            .await
            .expect("server stopped accepting");
        self.wait_for_state(ConnectionState::Connected).await;
        conn
    }

    pub async fn wait_for_state(&self, state: ConnectionState) {
        let mut store = self.handle.subscribe();
        within(store.wait_for(|snapshot| snapshot.connection == state))
            .await
            .expect("viewer stopped");
    }

    /// Skip events until one matches `pred`.
    pub async fn next_event<F>(&mut self, mut pred: F) -> ViewerEvent
    where
        F: FnMut(&ViewerEvent) -> bool,
    {
        let events = &mut self.events;
        within(async move {
            loop {
                match events.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => panic!("event stream closed"),
                }
            }
        })
        .await
    }

    /// Open `descriptor` and answer with `slot`.
    pub async fn open_slide(
        &mut self,
        conn: &mut ServerConnection,
        descriptor: ImageDescriptor,
        slot: Slot,
    ) {
        self.handle.open(descriptor).await.unwrap();
        match expect_command(conn).await {
            Command::Open { image, .. } => assert_eq!(image.id, descriptor.id),
            other => panic!("expected Open, got {:?}", other),
        }
        conn.send_frame(&Frame::OpenResponse {
            slot,
            id: descriptor.id,
        })
        .unwrap();
        self.next_event(
            |e| matches!(e, ViewerEvent::SessionOpened { id, .. } if *id == descriptor.id),
        )
        .await;
    }

    /// Send a tile and wait until the viewer has cached it.
    pub async fn deliver_tile(&mut self, conn: &ServerConnection, frame: Frame) {
        conn.send_frame(&frame).unwrap();
        self.next_event(|e| matches!(e, ViewerEvent::TileReady(_)))
            .await;
    }

    pub async fn shutdown(self) {
        self.handle.shutdown().await.unwrap();
        within(self.task).await.unwrap();
    }
}
