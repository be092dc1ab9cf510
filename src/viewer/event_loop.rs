use std::future;

use bytes::Bytes;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use crate::connection::{CommandSink, ConnectionEvent, ConnectionUpdate, StateChange};
use crate::error::{SessionError, ViewerError};
use crate::protocol::{Command, ErrorCode, Frame, ImageDescriptor, SlideId, Slot};
use crate::render::RenderFrame;
use crate::scheduler::{plan_frame, Fired, RenderPlan};
use crate::session::{Assignment, OpenOutcome};
use crate::tile::TileKey;
use crate::viewport::{ProtocolViewport, ViewportState};

use super::handle::ViewerCommand;
use super::{Decoded, Viewer, ViewerEvent};

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

impl Viewer {
    /// Process inputs until [`ViewerHandle::shutdown`] or until every handle
    /// is dropped.
    ///
    /// [`ViewerHandle::shutdown`]: super::ViewerHandle::shutdown
    pub async fn run(mut self) {
        info!(endpoint = %self.config.endpoint, "Viewer started");

        loop {
            let retry_at = self.retry.next_due();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ViewerCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.connection_events.recv() => self.handle_connection_event(event),
                Some(decoded) = self.decoded_rx.recv() => self.handle_decoded(decoded),
                Some(fired) = self.debounce_rx.recv() => self.handle_debounce(fired),
                _ = wait_until(retry_at) => self.handle_retry_due(),
            }
            self.store.publish();
        }

        self.debouncer.cancel_all();
        if let Some(change) = self.connection.disconnect(&mut self.registry) {
            self.apply_state(change);
        }
        self.store.publish();
        info!("Viewer stopped");
    }

    fn emit(&self, event: ViewerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // =========================================================================
    // Handle commands
    // =========================================================================

    fn handle_command(&mut self, command: ViewerCommand) {
        match command {
            ViewerCommand::Connect => {
                if let Some(change) = self.connection.connect() {
                    self.apply_state(change);
                }
            }
            ViewerCommand::Disconnect => {
                if let Some(change) = self.connection.disconnect(&mut self.registry) {
                    self.apply_state(change);
                    self.refresh_sessions();
                }
            }
            ViewerCommand::Open { descriptor, reply } => {
                let _ = reply.send(self.open(descriptor));
            }
            ViewerCommand::Close { id, reply } => {
                let _ = reply.send(self.close(id));
            }
            ViewerCommand::Activate { id, reply } => {
                let _ = reply.send(self.activate(id));
            }
            ViewerCommand::SetViewport {
                id,
                viewport,
                reply,
            } => {
                let _ = reply.send(self.set_viewport(id, viewport));
            }
            ViewerCommand::CurrentSlot { id, reply } => {
                let _ = reply.send(self.registry.state_of(&id));
            }
            ViewerCommand::Frame { reply } => {
                let _ = reply.send(self.build_frame());
            }
            ViewerCommand::ClearCache => self.clear_cache(),
            // Handled by the loop
            ViewerCommand::Shutdown => {}
        }
    }

    fn open(&mut self, descriptor: ImageDescriptor) -> Result<OpenOutcome, ViewerError> {
        let outcome = self.registry.open(descriptor, &mut self.connection)?;
        self.refresh_sessions();
        Ok(outcome)
    }

    fn close(&mut self, id: SlideId) -> Result<Option<Slot>, ViewerError> {
        let slot = self.registry.close(&id, &mut self.connection)?;
        self.forget_slide(&id);
        self.emit(ViewerEvent::SessionClosed { id, slot });
        self.refresh_sessions();
        Ok(slot)
    }

    fn activate(&mut self, id: SlideId) -> Result<(), ViewerError> {
        if !self.registry.contains(&id) {
            return Err(SessionError::NotOpen(id).into());
        }
        if self.active == Some(id) {
            return Ok(());
        }

        debug!(slide_id = %id, previous = ?self.active, "Switching active slide");
        self.active = Some(id);
        self.reset_tiles();

        let viewport = self.flushed.get(&id).copied();
        let draft = self.store.draft();
        draft.active = Some(id);
        draft.active_viewport = viewport;

        self.request_render();
        Ok(())
    }

    fn set_viewport(&mut self, id: SlideId, viewport: ViewportState) -> Result<(), ViewerError> {
        if !self.registry.contains(&id) {
            return Err(SessionError::NotOpen(id).into());
        }
        self.viewports.insert(id, viewport);
        self.debouncer.schedule(id);

        if self.active == Some(id) {
            self.request_render();
        }
        Ok(())
    }

    fn build_frame(&mut self) -> RenderFrame {
        match self.plan_active() {
            Some((plan, viewport)) => {
                RenderFrame::resolve(&plan, viewport, &mut self.cache, self.render_generation)
            }
            None => RenderFrame::empty(self.render_generation),
        }
    }

    fn clear_cache(&mut self) {
        self.reset_tiles();

        let assigned: Vec<(SlideId, Slot)> = self.registry.assigned().collect();
        for (id, slot) in &assigned {
            if let Err(e) = self.connection.send(Command::ClearCache { slot: *slot }) {
                debug!(slide_id = %id, slot, error = %e, "ClearCache not sent");
                continue;
            }
            // The server streams again on the next viewport it sees
            if let Some(viewport) = self.flushed.get(id).copied() {
                self.send_viewport(*id, viewport);
            }
        }

        info!(sessions = assigned.len(), "Tile cache cleared");
        self.request_render();
    }

    // =========================================================================
    // Connection events and frames
    // =========================================================================

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        let Some(update) = self.connection.handle_event(event, &mut self.registry) else {
            return;
        };

        match update {
            ConnectionUpdate::State(change) => {
                self.apply_state(change);
                self.refresh_sessions();
            }
            ConnectionUpdate::Frame(frame) => self.handle_frame(frame),
            ConnectionUpdate::ProtocolError(error) => {
                warn!(error = %error, "Dropping malformed frame");
                self.emit(ViewerEvent::ProtocolError(error));
            }
        }
    }

    fn apply_state(&mut self, change: StateChange) {
        let draft = self.store.draft();
        draft.connection = change.state;
        if let Some(diagnostic) = &change.diagnostic {
            draft.diagnostic = Some(diagnostic.clone());
            self.emit(ViewerEvent::TransportError(diagnostic.clone()));
        }
        self.emit(ViewerEvent::ConnectionChanged {
            state: change.state,
            diagnostic: change.diagnostic,
        });
    }

    fn handle_frame(&mut self, frame: Frame) {
        match frame {
            Frame::OpenResponse { slot, id } => match self.registry.assign(&id, slot) {
                Assignment::Assigned { viewport } => {
                    self.emit(ViewerEvent::SessionOpened { id, slot });
                    self.push_viewport(id, viewport);
                    self.refresh_sessions();
                }
                Assignment::Unknown => {
                    debug!(slide_id = %id, slot, "Slot assigned to a slide that is no longer open");
                    if let Err(e) = self.connection.send(Command::Close { slot }) {
                        debug!(slot, error = %e, "Close not sent");
                    }
                }
            },
            Frame::Tile {
                slot,
                column,
                row,
                level,
                data,
            } => {
                let Some(id) = self.registry.identity_for_slot(slot) else {
                    debug!(slot, level, column, row, "Tile for unknown slot dropped");
                    return;
                };
                if self.active != Some(id) {
                    trace!(slot, slide_id = %id, level, column, row, "Tile for an inactive slide dropped");
                    return;
                }
                let key = TileKey::new(id, level, column, row);
                trace!(slot, slide_id = %id, level, column, row, len = data.len(), "Tile received");
                self.spawn_decode(key, data);
            }
            Frame::Progress(progress) => {
                trace!(
                    slide_id = %progress.slide_id,
                    completed = progress.steps_completed,
                    total = progress.steps_total,
                    "Progress"
                );
                self.store
                    .draft()
                    .progress
                    .insert(progress.slide_id, progress);
                self.emit(ViewerEvent::Progress(progress));
            }
            Frame::RateLimited => {
                warn!("Server is rate limiting this client");
                self.store.draft().rate_limited += 1;
                self.emit(ViewerEvent::RateLimited);
            }
            Frame::SlideCreated(created) => {
                info!(slide_id = %created.id, filename = %created.filename, "Slide created");
                self.store.record_created(created.clone());
                self.emit(ViewerEvent::SlideCreated(created));
            }
            Frame::SlotReassigned {
                id,
                old_slot,
                new_slot,
            } => match self.registry.reassign(&id, old_slot, new_slot) {
                Some(viewport) => {
                    self.emit(ViewerEvent::SlotReassigned {
                        id,
                        old_slot,
                        new_slot,
                    });
                    self.push_viewport(id, viewport);
                    self.refresh_sessions();
                }
                None => debug!(slide_id = %id, old_slot, new_slot, "Reassignment for unknown slide"),
            },
            Frame::Error { code, id, message } => self.handle_error_frame(code, id, message),
        }
    }

    fn handle_error_frame(&mut self, code: ErrorCode, id: Option<SlideId>, message: String) {
        warn!(code = code.as_u8(), slide_id = ?id, message = %message, "Server reported an error");

        let removed = match (code, id) {
            (ErrorCode::SlotsExhausted, id) => self.registry.remove_pending(id.as_ref()),
            (_, Some(id)) => self.registry.remove_pending(Some(&id)),
            (_, None) => None,
        };
        let Some(descriptor) = removed else {
            return;
        };

        let error = match code {
            ErrorCode::SlotsExhausted => SessionError::Exhausted {
                capacity: self.registry.capacity(),
            },
            _ => SessionError::Rejected {
                id: descriptor.id,
                message,
            },
        };
        self.forget_slide(&descriptor.id);
        self.emit(ViewerEvent::SessionFailed {
            id: descriptor.id,
            error,
        });
        self.refresh_sessions();
    }

    // =========================================================================
    // Tiles
    // =========================================================================

    fn spawn_decode(&self, key: TileKey, data: Bytes) {
        let decoder = self.cache.decoder().clone();
        let decoded = self.decoded_tx.clone();
        let epoch = self.cache_epoch;
        tokio::spawn(async move {
            let result = decoder.decode_async(key, data).await;
            let _ = decoded.send(Decoded { key, epoch, result });
        });
    }

    fn handle_decoded(&mut self, decoded: Decoded) {
        let Decoded { key, epoch, result } = decoded;
        if epoch != self.cache_epoch || self.active != Some(key.slide) {
            trace!(%key, "Discarding tile decoded for a cleared cache or inactive slide");
            return;
        }

        match result {
            Ok(record) => {
                self.cache.insert(record);
                self.retry.received(&key);
                self.refresh_cache_stats();
                self.emit(ViewerEvent::TileReady(key));
                self.request_render();
            }
            Err(error) => {
                warn!(%key, error = %error, "Tile decode failed");
                self.retry.abandon(key);
                self.emit(ViewerEvent::TileDecodeFailed { key, error });
            }
        }
    }

    fn handle_retry_due(&mut self) {
        for key in self.retry.due(Instant::now()) {
            let Some(slot) = self.registry.current_slot(&key.slide) else {
                continue;
            };
            let command = Command::RequestTile {
                slot,
                column: key.column,
                row: key.row,
                level: key.level,
            };
            match self.connection.send(command) {
                Ok(()) => debug!(
                    slot,
                    level = key.level,
                    column = key.column,
                    row = key.row,
                    attempt = self.retry.attempts(&key).unwrap_or(0),
                    "Re-requesting missing tile"
                ),
                Err(e) => debug!(slot, %key, error = %e, "Tile re-request not sent"),
            }
        }
    }

    /// Drop every local tile and retry record.
    fn reset_tiles(&mut self) {
        self.cache.clear();
        self.retry.clear();
        self.cache_epoch += 1;
        self.refresh_cache_stats();
    }

    // =========================================================================
    // Viewports and rendering
    // =========================================================================

    fn handle_debounce(&mut self, fired: Fired<SlideId>) {
        if !self.debouncer.fired(&fired) {
            return;
        }
        if let Some(viewport) = self.viewports.get(&fired.key).copied() {
            self.send_viewport(fired.key, viewport);
        }
    }

    /// Send the newest viewport for a freshly (re)assigned slot, falling
    /// back to the one the registry kept.
    fn push_viewport(&mut self, id: SlideId, stored: Option<ProtocolViewport>) {
        if let Some(viewport) = self.viewports.get(&id).copied() {
            self.debouncer.cancel(&id);
            self.send_viewport(id, viewport);
        } else if let Some(viewport) = stored {
            if let Err(e) = self
                .registry
                .update_viewport(&id, viewport, &mut self.connection)
            {
                debug!(slide_id = %id, error = %e, "Viewport not sent");
            }
        }
    }

    fn send_viewport(&mut self, id: SlideId, viewport: ViewportState) {
        let wire = ProtocolViewport::from(&viewport);
        match self
            .registry
            .update_viewport(&id, wire, &mut self.connection)
        {
            Ok(true) => trace!(slide_id = %id, "Viewport sent"),
            Ok(false) => debug!(slide_id = %id, "Viewport held until a slot is assigned"),
            Err(SessionError::NotOpen(_)) => return,
            Err(e) => debug!(slide_id = %id, error = %e, "Viewport not sent"),
        }

        self.flushed.insert(id, viewport);
        if self.active == Some(id) {
            self.store.draft().active_viewport = Some(viewport);
        }
    }

    /// Plan the active slide and refresh retry tracking from it.
    fn plan_active(&mut self) -> Option<(RenderPlan, ViewportState)> {
        let id = self.active?;
        let viewport = *self.viewports.get(&id)?;
        let descriptor = self.registry.descriptor(&id)?;
        let plan = plan_frame(&viewport, descriptor, self.config.dpi, &self.cache);
        self.retry.track(plan.missing(), Instant::now());
        Some((plan, viewport))
    }

    fn request_render(&mut self) {
        self.render_generation += 1;
        let generation = self.render_generation;
        if self.plan_active().is_none() {
            self.retry.track(std::iter::empty(), Instant::now());
        }
        self.store.draft().render_generation = generation;
        self.emit(ViewerEvent::RenderRequested { generation });
    }

    // =========================================================================
    // Bookkeeping
    // =========================================================================

    /// Drop local state for a slide that is no longer open.
    fn forget_slide(&mut self, id: &SlideId) {
        self.debouncer.cancel(id);
        self.viewports.remove(id);
        self.flushed.remove(id);

        if self.active == Some(*id) {
            self.active = None;
            self.reset_tiles();
            let draft = self.store.draft();
            draft.active = None;
            draft.active_viewport = None;
            self.request_render();
        }
    }

    fn refresh_sessions(&mut self) {
        let sessions = self
            .registry
            .ids()
            .filter_map(|id| self.registry.state_of(&id).map(|state| (id, state)))
            .collect();
        self.store.draft().sessions = sessions;
    }

    fn refresh_cache_stats(&mut self) {
        let (tiles, bytes) = (self.cache.len(), self.cache.memory_bytes());
        let draft = self.store.draft();
        draft.cached_tiles = tiles;
        draft.cache_bytes = bytes;
    }
}
