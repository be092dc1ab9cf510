//! WSI tile client - streams Whole Slide Image tiles over a WebSocket.
//!
//! This binary wires the CLI to a [`Viewer`] over the WebSocket transport.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_tile_client::{
    config::{Cli, Command, SnapshotConfig, WatchConfig},
    render::{RenderFrame, RgbaSurface},
    transport::WsConnector,
    viewer::{Viewer, ViewerEvent, ViewerHandle},
    viewport::center_viewport,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.client().verbose);

    match cli.command {
        Command::Watch(config) => run_watch(config).await,
        Command::Snapshot(config) => run_snapshot(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "wsi_tile_client=debug"
    } else {
        "wsi_tile_client=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Watch Command
// =============================================================================

async fn run_watch(config: WatchConfig) -> ExitCode {
    if let Err(e) = config.client.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Configuration:");
    info!("  Endpoint: {}", config.client.endpoint);
    info!(
        "  Cache: {} tiles, {} slots, {} dpi",
        config.client.max_cached_tiles, config.client.max_slots, config.client.dpi
    );

    let connector = Arc::new(WsConnector::new());
    let (task, handle) = Viewer::spawn(config.client.viewer_config(), connector);
    let mut events = handle.events();

    if handle.connect().await.is_err() {
        error!("Viewer stopped before connecting");
        return ExitCode::FAILURE;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let _ = handle.shutdown().await;
    let _ = task.await;
    ExitCode::SUCCESS
}

fn log_event(event: &ViewerEvent) {
    match event {
        ViewerEvent::ConnectionChanged { state, diagnostic } => match diagnostic {
            Some(diagnostic) => info!("Connection {}: {}", state, diagnostic),
            None => info!("Connection {}", state),
        },
        ViewerEvent::Progress(progress) => info!(
            "Slide {} progress: {}/{} ({:.0}%)",
            progress.slide_id,
            progress.steps_completed,
            progress.steps_total,
            progress.fraction() * 100.0
        ),
        ViewerEvent::SlideCreated(created) => info!(
            "Slide created: {} ({}x{}, {} bytes) {}",
            created.filename, created.width, created.height, created.size_bytes, created.url
        ),
        ViewerEvent::RateLimited => warn!("Rate limited by server"),
        ViewerEvent::ProtocolError(e) => warn!("Malformed frame: {}", e),
        _ => {}
    }
}

// =============================================================================
// Snapshot Command
// =============================================================================

async fn run_snapshot(config: SnapshotConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let connector = Arc::new(WsConnector::new());
    let (task, handle) = Viewer::spawn(config.client.viewer_config(), connector);
    let result = snapshot(&config, &handle).await;
    let _ = handle.shutdown().await;
    let _ = task.await;

    let frame = match result {
        Ok(frame) => frame,
        Err(e) => {
            error!("Snapshot failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut surface = RgbaSurface::new(config.screen_width, config.screen_height);
    frame.draw(&mut surface);
    if let Err(e) = surface.save_png(&config.output) {
        error!("Failed to write {}: {}", config.output.display(), e);
        return ExitCode::FAILURE;
    }

    println!("Wrote {}", config.output.display());
    println!("  Level:       {}", frame.level);
    println!("  Exact:       {}", frame.stats.exact);
    println!("  Fallback:    {}", frame.stats.fallback);
    println!("  Placeholder: {}", frame.stats.placeholder);

    ExitCode::SUCCESS
}

/// Open the slide, wait for tiles and return the final frame.
async fn snapshot(config: &SnapshotConfig, handle: &ViewerHandle) -> Result<RenderFrame, String> {
    let descriptor = config.descriptor();
    let mut events = handle.events();

    handle.connect().await.map_err(|e| e.to_string())?;
    handle.open(descriptor).await.map_err(|e| e.to_string())?;
    handle.activate(descriptor.id).await.map_err(|e| e.to_string())?;

    let viewport = center_viewport(
        f64::from(config.screen_width),
        f64::from(config.screen_height),
        f64::from(descriptor.width),
        f64::from(descriptor.height),
    );
    handle
        .set_viewport(descriptor.id, viewport)
        .await
        .map_err(|e| e.to_string())?;

    let deadline = Instant::now() + Duration::from_millis(config.wait_ms);
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Err(_) | Ok(Err(RecvError::Closed)) => break,
            Ok(Err(RecvError::Lagged(_))) => {}
            Ok(Ok(ViewerEvent::SessionFailed { error, .. })) => return Err(error.to_string()),
            Ok(Ok(ViewerEvent::TileReady(_))) => {
                let frame = handle.frame().await.map_err(|e| e.to_string())?;
                if !frame.cells.is_empty() && frame.stats.exact == frame.cells.len() {
                    info!("All {} visible tiles received", frame.cells.len());
                    return Ok(frame);
                }
            }
            Ok(Ok(_)) => {}
        }
    }

    handle.frame().await.map_err(|e| e.to_string())
}
