use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::error::ViewerError;
use crate::protocol::{ImageDescriptor, SlideId, Slot};
use crate::render::RenderFrame;
use crate::session::{OpenOutcome, SlotState};
use crate::viewport::ViewportState;

use super::{StoreSnapshot, ViewerEvent};

type Reply<T> = oneshot::Sender<Result<T, ViewerError>>;

/// Requests accepted by the event loop.
pub(crate) enum ViewerCommand {
    Connect,
    Disconnect,
    Open {
        descriptor: ImageDescriptor,
        reply: Reply<OpenOutcome>,
    },
    Close {
        id: SlideId,
        reply: Reply<Option<Slot>>,
    },
    Activate {
        id: SlideId,
        reply: Reply<()>,
    },
    SetViewport {
        id: SlideId,
        viewport: ViewportState,
        reply: Reply<()>,
    },
    CurrentSlot {
        id: SlideId,
        reply: oneshot::Sender<Option<SlotState>>,
    },
    Frame {
        reply: oneshot::Sender<RenderFrame>,
    },
    ClearCache,
    Shutdown,
}

/// Cloneable front door to a running [`Viewer`](super::Viewer).
///
/// Every call is a message to the event loop; once the loop has stopped,
/// calls fail with [`ViewerError::Stopped`].
#[derive(Clone)]
pub struct ViewerHandle {
    commands: mpsc::Sender<ViewerCommand>,
    store: watch::Receiver<Arc<StoreSnapshot>>,
    events: broadcast::Sender<ViewerEvent>,
}

impl ViewerHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<ViewerCommand>,
        store: watch::Receiver<Arc<StoreSnapshot>>,
        events: broadcast::Sender<ViewerEvent>,
    ) -> Self {
        Self {
            commands,
            store,
            events,
        }
    }

    async fn send(&self, command: ViewerCommand) -> Result<(), ViewerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ViewerError::Stopped)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> ViewerCommand,
    ) -> Result<T, ViewerError> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply)).await?;
        rx.await.map_err(|_| ViewerError::Stopped)?
    }

    /// Start connecting. No-op if already connecting or connected.
    pub async fn connect(&self) -> Result<(), ViewerError> {
        self.send(ViewerCommand::Connect).await
    }

    /// Drop the connection and stop reconnecting.
    pub async fn disconnect(&self) -> Result<(), ViewerError> {
        self.send(ViewerCommand::Disconnect).await
    }

    /// Track a slide and ask the server for a slot.
    pub async fn open(&self, descriptor: ImageDescriptor) -> Result<OpenOutcome, ViewerError> {
        self.request(|reply| ViewerCommand::Open { descriptor, reply })
            .await
    }

    /// Stop tracking a slide. Returns the slot it held, if any.
    pub async fn close(&self, id: SlideId) -> Result<Option<Slot>, ViewerError> {
        self.request(|reply| ViewerCommand::Close { id, reply }).await
    }

    /// Make `id` the slide that frames are built for.
    pub async fn activate(&self, id: SlideId) -> Result<(), ViewerError> {
        self.request(|reply| ViewerCommand::Activate { id, reply })
            .await
    }

    /// Move the viewport of an open slide.
    ///
    /// Frames follow immediately; the server sees the change once the
    /// viewport has been still for the debounce delay.
    pub async fn set_viewport(
        &self,
        id: SlideId,
        viewport: ViewportState,
    ) -> Result<(), ViewerError> {
        self.request(|reply| ViewerCommand::SetViewport {
            id,
            viewport,
            reply,
        })
        .await
    }

    pub async fn current_slot(&self, id: SlideId) -> Result<Option<SlotState>, ViewerError> {
        let (reply, rx) = oneshot::channel();
        self.send(ViewerCommand::CurrentSlot { id, reply }).await?;
        rx.await.map_err(|_| ViewerError::Stopped)
    }

    /// Build the frame for the active slide from what is cached right now.
    pub async fn frame(&self) -> Result<RenderFrame, ViewerError> {
        let (reply, rx) = oneshot::channel();
        self.send(ViewerCommand::Frame { reply }).await?;
        rx.await.map_err(|_| ViewerError::Stopped)
    }

    /// Drop every cached tile and ask the server to resend.
    pub async fn clear_cache(&self) -> Result<(), ViewerError> {
        self.send(ViewerCommand::ClearCache).await
    }

    /// Stop the event loop, closing the connection.
    pub async fn shutdown(&self) -> Result<(), ViewerError> {
        self.send(ViewerCommand::Shutdown).await
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<StoreSnapshot>> {
        self.store.clone()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.store.borrow().clone()
    }

    pub fn events(&self) -> broadcast::Receiver<ViewerEvent> {
        self.events.subscribe()
    }
}
