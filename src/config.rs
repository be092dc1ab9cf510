//! Configuration management for the WSI tile client.
//!
//! This module provides the command-line interface:
//! - Command-line arguments via clap, one subcommand per mode
//! - Environment variables with `WSI_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use wsi_tile_client::config::{Cli, Command};
//!
//! let cli = Cli::parse();
//! if let Command::Watch(watch) = cli.command {
//!     println!("Connecting to {}", watch.client.endpoint);
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `WSI_ENDPOINT` - WebSocket URL of the tile server (required)
//! - `WSI_RECONNECT_BASE_DELAY_MS` - First reconnect delay (default: 500)
//! - `WSI_RECONNECT_MAX_DELAY_MS` - Reconnect delay ceiling (default: 30000)
//! - `WSI_MAX_RECONNECT_ATTEMPTS` - Consecutive failures before giving up (default: 0, never)
//! - `WSI_CONNECT_TIMEOUT_MS` - Handshake deadline (default: 10000)
//! - `WSI_MAX_CACHED_TILES` - Decoded tiles kept in memory (default: 512)
//! - `WSI_MAX_SLOTS` - Slides open at once (default: 256)
//! - `WSI_DPI` - Display density used for level choice (default: 96)
//! - `WSI_VIEWPORT_DEBOUNCE_MS` - Quiet period before a viewport is sent (default: 150)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use url::Url;

use crate::connection::ReconnectPolicy;
use crate::protocol::{ImageDescriptor, SlideId};
use crate::scheduler::{BASE_DPI, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
use crate::session::DEFAULT_SLOT_CAPACITY;
use crate::tile::DEFAULT_MAX_CACHED_TILES;
use crate::viewer::ViewerConfig;

// =============================================================================
// Default Values
// =============================================================================

/// Default first reconnect delay in milliseconds.
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 500;

/// Default reconnect delay ceiling in milliseconds.
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// Default handshake deadline in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default viewport debounce in milliseconds.
pub const DEFAULT_VIEWPORT_DEBOUNCE_MS: u64 = 150;

/// Default snapshot screen size.
pub const DEFAULT_SCREEN_WIDTH: u32 = 1280;
pub const DEFAULT_SCREEN_HEIGHT: u32 = 800;

/// Default time a snapshot waits for tiles, in milliseconds.
pub const DEFAULT_SNAPSHOT_WAIT_MS: u64 = 2_000;

// =============================================================================
// CLI Arguments
// =============================================================================

/// WSI tile client - streams Whole Slide Image tiles over a WebSocket.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-tile-client")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Connect and log server activity until Ctrl-C
    Watch(WatchConfig),

    /// Open one slide, wait for tiles and write the composited view as PNG
    Snapshot(SnapshotConfig),
}

impl Cli {
    /// Settings shared by every subcommand.
    pub fn client(&self) -> &ClientConfig {
        match &self.command {
            Command::Watch(watch) => &watch.client,
            Command::Snapshot(snapshot) => &snapshot.client,
        }
    }
}

/// Connection and cache settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct ClientConfig {
    // =========================================================================
    // Connection
    // =========================================================================
    /// WebSocket URL of the tile server (ws:// or wss://).
    #[arg(long, env = "WSI_ENDPOINT")]
    pub endpoint: String,

    /// Delay before the first reconnect attempt, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_RECONNECT_BASE_DELAY_MS, env = "WSI_RECONNECT_BASE_DELAY_MS")]
    pub reconnect_base_delay_ms: u64,

    /// Upper bound for the doubled reconnect delay, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_RECONNECT_MAX_DELAY_MS, env = "WSI_RECONNECT_MAX_DELAY_MS")]
    pub reconnect_max_delay_ms: u64,

    /// Consecutive failed attempts before giving up (0 = never).
    #[arg(long, default_value_t = 0, env = "WSI_MAX_RECONNECT_ATTEMPTS")]
    pub max_reconnect_attempts: u32,

    /// Deadline for each connection attempt, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_MS, env = "WSI_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: u64,

    // =========================================================================
    // Cache and sessions
    // =========================================================================
    /// Maximum number of decoded tiles kept in memory.
    #[arg(long, default_value_t = DEFAULT_MAX_CACHED_TILES, env = "WSI_MAX_CACHED_TILES")]
    pub max_cached_tiles: usize,

    /// Maximum number of slides open at once (1-256).
    #[arg(long, default_value_t = DEFAULT_SLOT_CAPACITY, env = "WSI_MAX_SLOTS")]
    pub max_slots: usize,

    // =========================================================================
    // Display
    // =========================================================================
    /// Display density; higher values pick finer pyramid levels.
    #[arg(long, default_value_t = BASE_DPI, env = "WSI_DPI")]
    pub dpi: f32,

    /// Quiet period before a moved viewport is sent, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_VIEWPORT_DEBOUNCE_MS, env = "WSI_VIEWPORT_DEBOUNCE_MS")]
    pub viewport_debounce_ms: u64,

    // =========================================================================
    // Logging
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl ClientConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.endpoint.is_empty() {
            return Err("Endpoint is required. Set --endpoint or WSI_ENDPOINT".to_string());
        }
        let url = Url::parse(&self.endpoint)
            .map_err(|e| format!("Invalid endpoint '{}': {}", self.endpoint, e))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(format!(
                "Endpoint must be a ws:// or wss:// URL, got '{}'",
                self.endpoint
            ));
        }

        if self.max_cached_tiles == 0 {
            return Err("max_cached_tiles must be greater than 0".to_string());
        }
        if self.max_slots == 0 || self.max_slots > DEFAULT_SLOT_CAPACITY {
            return Err(format!(
                "max_slots must be between 1 and {}",
                DEFAULT_SLOT_CAPACITY
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err("connect_timeout_ms must be greater than 0".to_string());
        }
        if !(self.dpi > 0.0) || !self.dpi.is_finite() {
            return Err("dpi must be a positive number".to_string());
        }
        if self.reconnect_base_delay_ms > self.reconnect_max_delay_ms {
            return Err(
                "reconnect_base_delay_ms must not exceed reconnect_max_delay_ms".to_string(),
            );
        }

        Ok(())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            max_attempts: self.max_reconnect_attempts,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    /// Runtime settings for a [`Viewer`](crate::viewer::Viewer).
    pub fn viewer_config(&self) -> ViewerConfig {
        ViewerConfig {
            endpoint: self.endpoint.clone(),
            reconnect: self.reconnect_policy(),
            max_cached_tiles: self.max_cached_tiles,
            max_slots: self.max_slots,
            dpi: self.dpi,
            viewport_debounce: Duration::from_millis(self.viewport_debounce_ms),
            retry_delay: DEFAULT_RETRY_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

// =============================================================================
// Subcommands
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct WatchConfig {
    #[command(flatten)]
    pub client: ClientConfig,
}

#[derive(Args, Debug, Clone)]
pub struct SnapshotConfig {
    #[command(flatten)]
    pub client: ClientConfig,

    /// Slide to open (UUID).
    #[arg(long)]
    pub slide_id: SlideId,

    /// Full-resolution width of the slide in pixels.
    #[arg(long)]
    pub width: u32,

    /// Full-resolution height of the slide in pixels.
    #[arg(long)]
    pub height: u32,

    /// Number of pyramid levels.
    #[arg(long)]
    pub levels: u32,

    /// Width of the rendered view.
    #[arg(long, default_value_t = DEFAULT_SCREEN_WIDTH)]
    pub screen_width: u32,

    /// Height of the rendered view.
    #[arg(long, default_value_t = DEFAULT_SCREEN_HEIGHT)]
    pub screen_height: u32,

    /// How long to wait for tiles before rendering, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_SNAPSHOT_WAIT_MS)]
    pub wait_ms: u64,

    /// Where to write the PNG.
    #[arg(short, long, default_value = "snapshot.png")]
    pub output: PathBuf,
}

impl SnapshotConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.client.validate()?;

        if self.width == 0 || self.height == 0 {
            return Err("Slide width and height must be greater than 0".to_string());
        }
        if self.levels == 0 {
            return Err("levels must be at least 1".to_string());
        }
        if self.screen_width == 0 || self.screen_height == 0 {
            return Err("Screen width and height must be greater than 0".to_string());
        }

        Ok(())
    }

    pub fn descriptor(&self) -> ImageDescriptor {
        ImageDescriptor::new(self.slide_id, self.width, self.height, self.levels)
    }
}

// =============================================================================
// Tests
// =============================================================================
