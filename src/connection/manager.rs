use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{ProtocolError, TransportError};
use crate::protocol::{Command, Frame};
use crate::session::SessionRegistry;
use crate::transport::{Connector, Transport};

use super::{CommandSink, ConnectionState, ReconnectPolicy};

// =============================================================================
// Events
// =============================================================================

/// Output of the manager's background tasks, fed back through
/// [`ConnectionManager::handle_event`].
pub struct ConnectionEvent {
    generation: u64,
    kind: EventKind,
}

enum EventKind {
    Established(Box<dyn Transport>),
    AttemptFailed(TransportError),
    Frame(Bytes),
    Lost(Option<TransportError>),
    RetryDue,
}

impl fmt::Debug for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            EventKind::Established(_) => "Established".to_string(),
            EventKind::AttemptFailed(e) => format!("AttemptFailed({})", e),
            EventKind::Frame(b) => format!("Frame({} bytes)", b.len()),
            EventKind::Lost(e) => format!("Lost({:?})", e),
            EventKind::RetryDue => "RetryDue".to_string(),
        };
        f.debug_struct("ConnectionEvent")
            .field("generation", &self.generation)
            .field("kind", &kind)
            .finish()
    }
}

/// A published state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub state: ConnectionState,
    pub diagnostic: Option<String>,
}

/// What the event loop has to act on after an event.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionUpdate {
    State(StateChange),
    Frame(Frame),
    ProtocolError(ProtocolError),
}

// =============================================================================
// ConnectionManager
// =============================================================================

/// Reconnecting owner of the transport.
pub struct ConnectionManager {
    endpoint: String,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,

    state: ConnectionState,
    generation: u64,
    failures: u32,
    ever_connected: bool,

    outbound: Option<mpsc::UnboundedSender<Bytes>>,
    attempt_task: Option<JoinHandle<()>>,
    io_task: Option<JoinHandle<()>>,
    retry_task: Option<JoinHandle<()>>,

    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ConnectionManager {
    /// Create a manager in the `Disconnected` state.
    ///
    /// The returned receiver yields the events to pass to
    /// [`handle_event`](Self::handle_event).
    pub fn new(
        endpoint: impl Into<String>,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            endpoint: endpoint.into(),
            connector,
            policy,
            state: ConnectionState::Disconnected,
            generation: 0,
            failures: 0,
            ever_connected: false,
            outbound: None,
            attempt_task: None,
            io_task: None,
            retry_task: None,
            events_tx,
        };
        (manager, events_rx)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Consecutive failed attempts since the last successful connect.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Start connecting. No-op while connecting or connected.
    pub fn connect(&mut self) -> Option<StateChange> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => None,
            ConnectionState::Disconnected | ConnectionState::Error => {
                self.failures = 0;
                self.cancel_retry();
                Some(self.start_attempt())
            }
        }
    }

    /// Tear everything down and stay disconnected until [`connect`](Self::connect).
    pub fn disconnect(&mut self, registry: &mut SessionRegistry) -> Option<StateChange> {
        self.generation += 1;
        self.cancel_retry();
        if let Some(task) = self.attempt_task.take() {
            task.abort();
        }
        // Dropping the sender makes the I/O task close the transport
        self.outbound = None;
        self.io_task = None;
        registry.invalidate_slots();

        if self.state == ConnectionState::Disconnected {
            return None;
        }
        info!(endpoint = %self.endpoint, "Disconnected by request");
        Some(self.transition(ConnectionState::Disconnected, None))
    }

    /// Apply one background event.
    pub fn handle_event(
        &mut self,
        event: ConnectionEvent,
        registry: &mut SessionRegistry,
    ) -> Option<ConnectionUpdate> {
        if event.generation != self.generation {
            trace!(
                event_generation = event.generation,
                generation = self.generation,
                "Ignoring stale connection event"
            );
            if let EventKind::Established(mut transport) = event.kind {
                tokio::spawn(async move { transport.close().await });
            }
            return None;
        }

        match event.kind {
            EventKind::Established(transport) => {
                Some(ConnectionUpdate::State(self.on_established(transport, registry)))
            }
            EventKind::AttemptFailed(error) => {
                Some(ConnectionUpdate::State(self.on_attempt_failed(error)))
            }
            EventKind::Frame(bytes) => {
                if self.state != ConnectionState::Connected {
                    return None;
                }
                trace!(len = bytes.len(), "Frame received");
                Some(match Frame::decode(bytes) {
                    Ok(frame) => ConnectionUpdate::Frame(frame),
                    Err(e) => ConnectionUpdate::ProtocolError(e),
                })
            }
            EventKind::Lost(error) => Some(ConnectionUpdate::State(self.on_lost(error, registry))),
            EventKind::RetryDue => {
                self.retry_task = None;
                match self.state {
                    ConnectionState::Disconnected | ConnectionState::Error => {
                        Some(ConnectionUpdate::State(self.start_attempt()))
                    }
                    _ => None,
                }
            }
        }
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    fn transition(&mut self, state: ConnectionState, diagnostic: Option<String>) -> StateChange {
        self.state = state;
        StateChange { state, diagnostic }
    }

    fn start_attempt(&mut self) -> StateChange {
        self.generation += 1;
        let generation = self.generation;
        let connector = self.connector.clone();
        let endpoint = self.endpoint.clone();
        let timeout = self.policy.connect_timeout;
        let events = self.events_tx.clone();

        info!(endpoint = %self.endpoint, generation, attempt = self.failures + 1, "Connecting");

        self.attempt_task = Some(tokio::spawn(async move {
            let kind = match tokio::time::timeout(timeout, connector.connect(&endpoint)).await {
                Ok(Ok(transport)) => EventKind::Established(transport),
                Ok(Err(e)) => EventKind::AttemptFailed(e),
                Err(_) => EventKind::AttemptFailed(TransportError::Timeout { after: timeout }),
            };
            let _ = events.send(ConnectionEvent { generation, kind });
        }));

        self.transition(ConnectionState::Connecting, None)
    }

    fn on_established(
        &mut self,
        transport: Box<dyn Transport>,
        registry: &mut SessionRegistry,
    ) -> StateChange {
        self.attempt_task = None;
        self.failures = 0;

        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound = Some(tx);
        self.io_task = Some(tokio::spawn(run_io(
            transport,
            rx,
            self.events_tx.clone(),
            self.generation,
        )));
        self.state = ConnectionState::Connected;

        if self.ever_connected {
            let replayed = registry.replay_opens(self);
            info!(endpoint = %self.endpoint, replayed, "Reconnected");
        } else {
            let flushed = registry.flush_unsent(self);
            info!(endpoint = %self.endpoint, flushed, "Connected");
        }
        self.ever_connected = true;

        self.transition(ConnectionState::Connected, None)
    }

    fn on_attempt_failed(&mut self, error: TransportError) -> StateChange {
        self.attempt_task = None;
        self.failures += 1;

        if self.policy.should_retry(self.failures) {
            let delay = self.policy.delay_for(self.failures);
            warn!(
                endpoint = %self.endpoint,
                attempt = self.failures,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Connect attempt failed, retrying"
            );
            self.schedule_retry(delay);
        } else {
            warn!(
                endpoint = %self.endpoint,
                attempts = self.failures,
                error = %error,
                "Connect attempt failed, giving up"
            );
        }

        self.transition(ConnectionState::Error, Some(error.to_string()))
    }

    fn on_lost(
        &mut self,
        error: Option<TransportError>,
        registry: &mut SessionRegistry,
    ) -> StateChange {
        self.outbound = None;
        self.io_task = None;
        registry.invalidate_slots();

        let error = error.unwrap_or(TransportError::Closed);
        let delay = self.policy.base_delay;
        warn!(
            endpoint = %self.endpoint,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "Connection lost"
        );
        self.schedule_retry(delay);

        self.transition(ConnectionState::Disconnected, Some(error.to_string()))
    }

    fn schedule_retry(&mut self, delay: std::time::Duration) {
        self.cancel_retry();
        let generation = self.generation;
        let events = self.events_tx.clone();
        self.retry_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ConnectionEvent {
                generation,
                kind: EventKind::RetryDue,
            });
        }));
    }

    fn cancel_retry(&mut self) {
        if let Some(task) = self.retry_task.take() {
            task.abort();
        }
    }
}

impl CommandSink for ConnectionManager {
    fn send(&mut self, command: Command) -> Result<(), TransportError> {
        if self.state != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        let outbound = self.outbound.as_ref().ok_or(TransportError::NotConnected)?;
        trace!(kind = command.kind().name(), slot = ?command.slot(), "Sending command");
        outbound
            .send(command.encode())
            .map_err(|_| TransportError::Closed)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        for task in [self.attempt_task.take(), self.retry_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

// =============================================================================
// I/O task
// =============================================================================

/// Pump frames between the transport and the event loop until either side
/// goes away.
async fn run_io(
    mut transport: Box<dyn Transport>,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    generation: u64,
) {
    let reason = loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(bytes) => {
                    if let Err(e) = transport.send(bytes).await {
                        break Some(e);
                    }
                }
                None => {
                    debug!(generation, "Outbound queue closed, closing transport");
                    transport.close().await;
                    return;
                }
            },
            incoming = transport.recv() => match incoming {
                Some(Ok(bytes)) => {
                    let event = ConnectionEvent { generation, kind: EventKind::Frame(bytes) };
                    if events.send(event).is_err() {
                        transport.close().await;
                        return;
                    }
                }
                Some(Err(e)) => break Some(e),
                None => break None,
            },
        }
    };

    transport.close().await;
    let _ = events.send(ConnectionEvent {
        generation,
        kind: EventKind::Lost(reason),
    });
}

// =============================================================================
// Tests
// =============================================================================
