//! Viewer: the single writer that ties every layer together.
//!
//! ```text
//!   ViewerHandle ──commands──┐
//!   ConnectionManager ──events──┤
//!   TileDecoder ──decoded tiles─┼──▶ Viewer::run ──▶ watch<StoreSnapshot>
//!   Debouncer ──firings─────────┤        │       └─▶ broadcast<ViewerEvent>
//!   retry deadline ─────────────┘        ▼
//!                         SessionRegistry · TileCache · TileRetryTracker
//! ```
//!
//! All mutable state lives in [`Viewer`] and is touched only from
//! [`Viewer::run`], one input at a time. Everything else talks to it through
//! a [`ViewerHandle`] and reads state from published [`StoreSnapshot`]s.

mod event_loop;
mod events;
mod handle;
mod store;

pub use events::ViewerEvent;
pub use handle::ViewerHandle;
pub use store::{StoreSnapshot, MAX_RECENT_SLIDES};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::connection::{ConnectionEvent, ConnectionManager, ReconnectPolicy};
use crate::error::DecodeError;
use crate::protocol::SlideId;
use crate::scheduler::{
    Debouncer, Fired, TileRetryTracker, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY,
    DEFAULT_VIEWPORT_DEBOUNCE,
};
use crate::session::{SessionRegistry, DEFAULT_SLOT_CAPACITY};
use crate::tile::{TileCache, TileKey, TileRecord, DEFAULT_MAX_CACHED_TILES};
use crate::transport::Connector;
use crate::viewport::ViewportState;

use handle::ViewerCommand;
use store::ViewerStore;

const COMMAND_QUEUE_SIZE: usize = 64;
const EVENT_QUEUE_SIZE: usize = 256;

/// Runtime settings of a viewer.
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// WebSocket URL of the tile server
    pub endpoint: String,
    pub reconnect: ReconnectPolicy,
    pub max_cached_tiles: usize,
    pub max_slots: usize,
    /// Display density; 96 is a standard display
    pub dpi: f32,
    pub viewport_debounce: Duration,
    pub retry_delay: Duration,
    pub max_retries: u32,
}

impl ViewerConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            reconnect: ReconnectPolicy::default(),
            max_cached_tiles: DEFAULT_MAX_CACHED_TILES,
            max_slots: DEFAULT_SLOT_CAPACITY,
            dpi: crate::scheduler::BASE_DPI,
            viewport_debounce: DEFAULT_VIEWPORT_DEBOUNCE,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Outcome of an off-loop tile decode.
struct Decoded {
    key: TileKey,
    /// Cache epoch the tile was requested under
    epoch: u64,
    result: Result<TileRecord, DecodeError>,
}

/// The viewer event loop and everything it owns.
pub struct Viewer {
    config: ViewerConfig,

    connection: ConnectionManager,
    connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
    registry: SessionRegistry,
    cache: TileCache,
    retry: TileRetryTracker,
    debouncer: Debouncer<SlideId>,
    debounce_rx: mpsc::UnboundedReceiver<Fired<SlideId>>,

    commands: mpsc::Receiver<ViewerCommand>,
    decoded_tx: mpsc::UnboundedSender<Decoded>,
    decoded_rx: mpsc::UnboundedReceiver<Decoded>,

    store: ViewerStore,
    events: broadcast::Sender<ViewerEvent>,

    /// Latest viewport per slide, debounced or not
    viewports: HashMap<SlideId, ViewportState>,
    /// Viewport per slide as last flushed to the registry
    flushed: HashMap<SlideId, ViewportState>,
    active: Option<SlideId>,
    render_generation: u64,
    /// Bumped whenever the cache is cleared; older decodes are discarded
    cache_epoch: u64,
}

impl Viewer {
    /// Build a viewer. Nothing happens until [`run`](Self::run) is polled.
    pub fn new(config: ViewerConfig, connector: Arc<dyn Connector>) -> (Self, ViewerHandle) {
        let (connection, connection_events) =
            ConnectionManager::new(config.endpoint.clone(), connector, config.reconnect);
        let (debouncer, debounce_rx) = Debouncer::new(config.viewport_debounce);
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let (decoded_tx, decoded_rx) = mpsc::unbounded_channel();
        let (store, store_rx) = ViewerStore::new();
        let (events, _) = broadcast::channel(EVENT_QUEUE_SIZE);

        let handle = ViewerHandle::new(commands_tx, store_rx, events.clone());
        let viewer = Self {
            registry: SessionRegistry::new(config.max_slots, config.dpi),
            cache: TileCache::new(config.max_cached_tiles),
            retry: TileRetryTracker::new(config.retry_delay, config.max_retries),
            config,
            connection,
            connection_events,
            debouncer,
            debounce_rx,
            commands,
            decoded_tx,
            decoded_rx,
            store,
            events,
            viewports: HashMap::new(),
            flushed: HashMap::new(),
            active: None,
            render_generation: 0,
            cache_epoch: 0,
        };
        (viewer, handle)
    }

    /// Build a viewer and run it on a new task.
    pub fn spawn(
        config: ViewerConfig,
        connector: Arc<dyn Connector>,
    ) -> (JoinHandle<()>, ViewerHandle) {
        let (viewer, handle) = Self::new(config, connector);
        (tokio::spawn(viewer.run()), handle)
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }
}
