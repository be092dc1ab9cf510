//! Session Registry: slide identity to server slot.
//!
//! # Lifecycle
//!
//! ```text
//!  open() ──▶ Pending ──OpenResponse──▶ Assigned(slot) ──close()──▶ (removed)
//!               ▲                           │
//!               └──── transport lost ───────┘  (replayed on reconnect)
//! ```
//!
//! Sessions are kept in open order; replays after a reconnect follow that
//! order. The registry never talks to the transport directly: every command
//! goes through a [`CommandSink`], which reports whether it reached the wire.

use tracing::{debug, info, warn};

use crate::connection::CommandSink;
use crate::error::SessionError;
use crate::protocol::{Command, ImageDescriptor, SlideId, Slot};
use crate::viewport::ProtocolViewport;

/// Default number of concurrent sessions (one-byte slot space).
pub const DEFAULT_SLOT_CAPACITY: usize = 256;

/// Where a session stands with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// `Open` sent (or queued), no `OpenResponse` yet
    Pending,
    /// The server assigned this slot
    Assigned(Slot),
}

impl SlotState {
    pub fn slot(self) -> Option<Slot> {
        match self {
            SlotState::Pending => None,
            SlotState::Assigned(slot) => Some(slot),
        }
    }
}

/// Result of [`SessionRegistry::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// The slide was already tracked; nothing was sent
    Existing(SlotState),
    /// A new session was created and `Open` was issued (or queued until connect)
    Requested,
}

/// What the caller should do after an `OpenResponse`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Assignment {
    /// Slot recorded. Push this viewport right away, if any.
    Assigned { viewport: Option<ProtocolViewport> },
    /// Nobody asked for this slide (closed while pending). Release the slot.
    Unknown,
}

#[derive(Debug, Clone)]
struct Session {
    descriptor: ImageDescriptor,
    state: SlotState,
    open_sent: bool,
    viewport: Option<ProtocolViewport>,
}

/// Maps slide identities to server-assigned slots.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Vec<Session>,
    capacity: usize,
    dpi: f32,
}

impl SessionRegistry {
    pub fn new(capacity: usize, dpi: f32) -> Self {
        Self {
            sessions: Vec::new(),
            capacity,
            dpi,
        }
    }

    fn find(&self, id: &SlideId) -> Option<usize> {
        self.sessions.iter().position(|s| s.descriptor.id == *id)
    }

    fn send_open(dpi: f32, session: &mut Session, sink: &mut dyn CommandSink) {
        let command = Command::Open {
            dpi,
            image: session.descriptor,
        };
        match sink.send(command) {
            Ok(()) => session.open_sent = true,
            Err(e) => {
                debug!(slide_id = %session.descriptor.id, error = %e, "Open deferred until connected");
                session.open_sent = false;
            }
        }
    }

    /// Start tracking a slide.
    ///
    /// An already-tracked slide is returned as-is without another `Open`.
    /// When every slot is taken the call fails with
    /// [`SessionError::Exhausted`] and nothing is sent.
    pub fn open(
        &mut self,
        descriptor: ImageDescriptor,
        sink: &mut dyn CommandSink,
    ) -> Result<OpenOutcome, SessionError> {
        if let Some(index) = self.find(&descriptor.id) {
            return Ok(OpenOutcome::Existing(self.sessions[index].state));
        }

        if self.sessions.len() >= self.capacity {
            warn!(slide_id = %descriptor.id, capacity = self.capacity, "No free slots");
            return Err(SessionError::Exhausted {
                capacity: self.capacity,
            });
        }

        let mut session = Session {
            descriptor,
            state: SlotState::Pending,
            open_sent: false,
            viewport: None,
        };
        Self::send_open(self.dpi, &mut session, sink);
        self.sessions.push(session);

        debug!(slide_id = %descriptor.id, sessions = self.sessions.len(), "Session opened");
        Ok(OpenOutcome::Requested)
    }

    /// Stop tracking a slide and release its slot.
    ///
    /// Returns the slot that was released, if one had been assigned.
    pub fn close(
        &mut self,
        id: &SlideId,
        sink: &mut dyn CommandSink,
    ) -> Result<Option<Slot>, SessionError> {
        let index = self.find(id).ok_or(SessionError::NotOpen(*id))?;
        let session = self.sessions.remove(index);

        let slot = session.state.slot();
        if let Some(slot) = slot {
            if let Err(e) = sink.send(Command::Close { slot }) {
                debug!(slide_id = %id, slot, error = %e, "Close not sent");
            }
        }
        debug!(slide_id = %id, ?slot, "Session closed");
        Ok(slot)
    }

    /// A slot belongs to one identity at a time.
    fn release_slot_from_others(&mut self, id: &SlideId, slot: Slot) {
        for other in self.sessions.iter_mut() {
            if other.descriptor.id != *id && other.state == SlotState::Assigned(slot) {
                warn!(slide_id = %other.descriptor.id, slot, "Slot taken over by another slide");
                other.state = SlotState::Pending;
            }
        }
    }

    /// Record the slot from an `OpenResponse`.
    pub fn assign(&mut self, id: &SlideId, slot: Slot) -> Assignment {
        let Some(index) = self.find(id) else {
            return Assignment::Unknown;
        };

        self.release_slot_from_others(id, slot);

        let session = &mut self.sessions[index];
        session.state = SlotState::Assigned(slot);
        session.open_sent = true;
        info!(slide_id = %id, slot, "Slot assigned");

        Assignment::Assigned {
            viewport: session.viewport,
        }
    }

    /// Follow a server-side slot move.
    ///
    /// Returns the last viewport for the slide so the caller can resend it
    /// against the new slot, or `None` if the slide is not tracked.
    pub fn reassign(
        &mut self,
        id: &SlideId,
        old_slot: Slot,
        new_slot: Slot,
    ) -> Option<Option<ProtocolViewport>> {
        let index = self.find(id)?;
        self.release_slot_from_others(id, new_slot);
        let session = &mut self.sessions[index];

        if session.state != SlotState::Assigned(old_slot) {
            debug!(
                slide_id = %id,
                old_slot,
                new_slot,
                current = ?session.state,
                "Reassignment from a slot we did not record"
            );
        }
        session.state = SlotState::Assigned(new_slot);
        session.open_sent = true;
        info!(slide_id = %id, old_slot, new_slot, "Slot reassigned");

        Some(session.viewport)
    }

    /// Remember the latest viewport and send it if a slot is assigned.
    ///
    /// Returns `true` when an `UpdateViewport` reached the sink. A pending
    /// session keeps the viewport and gets it on `OpenResponse`.
    pub fn update_viewport(
        &mut self,
        id: &SlideId,
        viewport: ProtocolViewport,
        sink: &mut dyn CommandSink,
    ) -> Result<bool, SessionError> {
        let index = self.find(id).ok_or(SessionError::NotOpen(*id))?;
        let session = &mut self.sessions[index];
        session.viewport = Some(viewport);

        match session.state {
            SlotState::Pending => Ok(false),
            SlotState::Assigned(slot) => {
                sink.send(Command::UpdateViewport { slot, viewport })?;
                Ok(true)
            }
        }
    }

    /// Re-issue `Open` for every session, in open order.
    ///
    /// All sessions go back to pending first, since slots from an earlier
    /// connection mean nothing on a new one.
    pub fn replay_opens(&mut self, sink: &mut dyn CommandSink) -> usize {
        let dpi = self.dpi;
        let mut sent = 0;
        for session in self.sessions.iter_mut() {
            session.state = SlotState::Pending;
            Self::send_open(dpi, session, sink);
            if session.open_sent {
                sent += 1;
            }
        }
        sent
    }

    /// Send `Open` for sessions whose request never reached the wire.
    pub fn flush_unsent(&mut self, sink: &mut dyn CommandSink) -> usize {
        let dpi = self.dpi;
        let mut sent = 0;
        for session in self.sessions.iter_mut().filter(|s| !s.open_sent) {
            Self::send_open(dpi, session, sink);
            if session.open_sent {
                sent += 1;
            }
        }
        sent
    }

    /// Forget every slot after the transport went away.
    pub fn invalidate_slots(&mut self) {
        for session in self.sessions.iter_mut() {
            session.state = SlotState::Pending;
            session.open_sent = false;
        }
    }

    /// Drop a session the server refused to open.
    ///
    /// Only pending sessions are removed. With no id, the oldest pending
    /// session is taken.
    pub fn remove_pending(&mut self, id: Option<&SlideId>) -> Option<ImageDescriptor> {
        let index = match id {
            Some(id) => self
                .find(id)
                .filter(|&i| self.sessions[i].state == SlotState::Pending)?,
            None => self
                .sessions
                .iter()
                .position(|s| s.state == SlotState::Pending)?,
        };
        Some(self.sessions.remove(index).descriptor)
    }

    pub fn state_of(&self, id: &SlideId) -> Option<SlotState> {
        self.find(id).map(|i| self.sessions[i].state)
    }

    /// Current slot for a slide, if assigned.
    pub fn current_slot(&self, id: &SlideId) -> Option<Slot> {
        self.state_of(id).and_then(SlotState::slot)
    }

    /// Slide that currently owns `slot`.
    pub fn identity_for_slot(&self, slot: Slot) -> Option<SlideId> {
        self.sessions
            .iter()
            .find(|s| s.state == SlotState::Assigned(slot))
            .map(|s| s.descriptor.id)
    }

    pub fn descriptor(&self, id: &SlideId) -> Option<&ImageDescriptor> {
        self.find(id).map(|i| &self.sessions[i].descriptor)
    }

    pub fn contains(&self, id: &SlideId) -> bool {
        self.find(id).is_some()
    }

    /// Every `(identity, slot)` with an assigned slot, in open order.
    pub fn assigned(&self) -> impl Iterator<Item = (SlideId, Slot)> + '_ {
        self.sessions
            .iter()
            .filter_map(|s| s.state.slot().map(|slot| (s.descriptor.id, slot)))
    }

    /// Tracked identities in open order.
    pub fn ids(&self) -> impl Iterator<Item = SlideId> + '_ {
        self.sessions.iter().map(|s| s.descriptor.id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dpi(&self) -> f32 {
        self.dpi
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SLOT_CAPACITY, 96.0)
    }
}

// =============================================================================
// Tests
// =============================================================================
