//! # WSI Tile Client
//!
//! A streaming client for Whole Slide Images (WSI) served over a persistent
//! WebSocket connection.
//!
//! The server pushes tiles for whatever region the client says it is looking
//! at. This library keeps that region up to date, caches the decoded tiles,
//! and decides what to draw for every frame, substituting coarser tiles while
//! finer ones are still in flight.
//!
//! ## Features
//!
//! - **Multiplexed sessions**: many slides over one connection, each on a server-assigned slot
//! - **Self-healing connection**: exponential reconnect with replay of every open slide
//! - **Progressive rendering**: exact, fallback (ancestor sub-rectangle) or placeholder per cell
//! - **Bounded memory**: LRU tile cache with a fixed tile count
//! - **DPI-aware level choice**: the pyramid level follows zoom and display density
//!
//! ## Architecture
//!
//! - [`viewport`] - Viewport state and pan/zoom/clamp math
//! - [`protocol`] - Binary wire format shared with the server
//! - [`transport`] - WebSocket and in-process transports
//! - [`connection`] - Connection state machine and reconnect policy
//! - [`session`] - Slide identity to slot mapping
//! - [`tile`] - Tile decoding and the LRU tile cache
//! - [`scheduler`] - Level selection, visible grid, render plans, tile retries
//! - [`render`] - Draw-surface contract and a CPU compositor
//! - [`viewer`] - The event loop tying everything together
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wsi_tile_client::{
//!     center_viewport, ImageDescriptor, SlideId, Viewer, ViewerConfig, WsConnector,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ViewerConfig::new("ws://localhost:3000/ws");
//!     let (_task, viewer) = Viewer::spawn(config, Arc::new(WsConnector::new()));
//!
//!     let slide = ImageDescriptor::new(SlideId::random(), 40_000, 30_000, 8);
//!     viewer.connect().await.unwrap();
//!     viewer.open(slide).await.unwrap();
//!     viewer.activate(slide.id).await.unwrap();
//!     viewer
//!         .set_viewport(slide.id, center_viewport(1280.0, 800.0, 40_000.0, 30_000.0))
//!         .await
//!         .unwrap();
//!
//!     let frame = viewer.frame().await.unwrap();
//!     println!("{} cells at level {}", frame.cells.len(), frame.level);
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod render;
pub mod scheduler;
pub mod session;
pub mod tile;
pub mod transport;
pub mod viewer;
pub mod viewport;

// Re-export commonly used types
pub use config::{Cli, ClientConfig, SnapshotConfig, WatchConfig};
pub use connection::{CommandSink, ConnectionManager, ConnectionState, ReconnectPolicy};
pub use error::{DecodeError, ProtocolError, SessionError, TransportError, ViewerError};
pub use protocol::{Command, Frame, ImageDescriptor, Progress, SlideCreated, SlideId, Slot};
pub use render::{DrawSurface, RenderFrame, RgbaSurface};
pub use scheduler::{plan_frame, CellKind, RenderPlan, TileRetryTracker, TILE_SIZE};
pub use session::{OpenOutcome, SessionRegistry, SlotState};
pub use tile::{TileCache, TileDecoder, TileKey, TileRecord};
pub use transport::{
    memory_channel, Connector, MemoryConnector, MemoryServer, Transport, WsConnector,
};
pub use viewer::{StoreSnapshot, Viewer, ViewerConfig, ViewerEvent, ViewerHandle};
pub use viewport::{
    center_viewport, clamp_viewport, pan, resize, zoom_around, ProtocolViewport, ViewportState,
};
