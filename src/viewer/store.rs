use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::watch;

use crate::connection::ConnectionState;
use crate::protocol::{Progress, SlideCreated, SlideId};
use crate::session::SlotState;
use crate::viewport::ViewportState;

/// Slide announcements kept in a snapshot.
pub const MAX_RECENT_SLIDES: usize = 64;

/// Read-only view of the viewer state handed to the UI.
///
/// A new snapshot is published after every event loop step that changed
/// something; old snapshots stay valid for whoever still holds them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    pub connection: ConnectionState,
    /// Last diagnostic that came with a state change
    pub diagnostic: Option<String>,
    /// Latest progress per slide
    pub progress: HashMap<SlideId, Progress>,
    /// Recently announced slides, newest last
    pub created: VecDeque<SlideCreated>,
    pub rate_limited: u64,
    pub sessions: Vec<(SlideId, SlotState)>,
    pub active: Option<SlideId>,
    /// Viewport of the active slide as last sent to the server
    pub active_viewport: Option<ViewportState>,
    pub render_generation: u64,
    pub cached_tiles: usize,
    pub cache_bytes: usize,
}

impl StoreSnapshot {
    pub fn progress_for(&self, id: &SlideId) -> Option<&Progress> {
        self.progress.get(id)
    }

    pub fn slot_state(&self, id: &SlideId) -> Option<SlotState> {
        self.sessions
            .iter()
            .find(|(session, _)| session == id)
            .map(|(_, state)| *state)
    }
}

/// Writer side of the snapshot channel, owned by the event loop.
pub(crate) struct ViewerStore {
    tx: watch::Sender<Arc<StoreSnapshot>>,
    draft: StoreSnapshot,
    dirty: bool,
}

impl ViewerStore {
    pub(crate) fn new() -> (Self, watch::Receiver<Arc<StoreSnapshot>>) {
        let (tx, rx) = watch::channel(Arc::new(StoreSnapshot::default()));
        let store = Self {
            tx,
            draft: StoreSnapshot::default(),
            dirty: false,
        };
        (store, rx)
    }

    #[cfg(test)]
    pub(crate) fn current(&self) -> &StoreSnapshot {
        &self.draft
    }

    /// Mutable access to the next snapshot.
    pub(crate) fn draft(&mut self) -> &mut StoreSnapshot {
        self.dirty = true;
        &mut self.draft
    }

    pub(crate) fn record_created(&mut self, created: SlideCreated) {
        let draft = self.draft();
        if draft.created.len() == MAX_RECENT_SLIDES {
            draft.created.pop_front();
        }
        draft.created.push_back(created);
    }

    /// Publish the draft if anything changed since the last publish.
    pub(crate) fn publish(&mut self) {
        if self.dirty {
            self.tx.send_replace(Arc::new(self.draft.clone()));
            self.dirty = false;
        }
    }
}
