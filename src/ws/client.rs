//! Resilient socket client
//!
//! `SocketClient` is a cheap, cloneable handle. All connection state lives in
//! a single driver task that handles one input at a time: commands from
//! handles, events from the current transport, and timer firings. Nothing
//! the driver owns is shared, so the state machine needs no locks.
//!
//! Lifecycle:
//! ```text
//! Idle -> Connecting -> Open -> Closed -+-> (reconnect_interval) -> Connecting
//!                                       +-> stays Closed after close() or
//!                                           once the attempt budget is spent
//! ```

use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::metrics::{ClientMetrics, MetricsSnapshot};
use crate::ws::connection::TungsteniteConnector;
use crate::ws::heartbeat::Heartbeat;
use crate::ws::message::{InboundMessage, Payload};
use crate::ws::reconnect::ReconnectPolicy;
use crate::ws::registry::{dispatch, EventKind, Subscribers, Subscription};
use crate::ws::timer::{TimerFired, TimerKind, TimerSlot};
use crate::ws::transport::{
    CloseEvent, Connector, ErrorEvent, ErrorSource, EventSink, OpenEvent, ReadyState,
    TaggedEvent, Transport, TransportEvent,
};
use crate::{Result, SocketError};

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

/// Client lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    /// Never connected
    Idle,
    /// Transport created, handshake pending
    Connecting,
    /// Transport open
    Open,
    /// Closed by the caller, waiting for the transport's final close event
    Closing,
    /// No live transport
    Closed,
}

/// Snapshot of the driver's state, republished after every input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientStatus {
    pub phase: LifecyclePhase,
    pub ready_state: ReadyState,
    /// Reconnect attempts used in the current lifecycle
    pub reconnect_attempts: u32,
    pub manual_close: bool,
    pub heartbeat_active: bool,
    pub reconnect_pending: bool,
    /// Transports created so far
    pub generation: u64,
}

impl ClientStatus {
    fn initial() -> Self {
        Self {
            phase: LifecyclePhase::Idle,
            ready_state: ReadyState::Closed,
            reconnect_attempts: 0,
            manual_close: false,
            heartbeat_active: false,
            reconnect_pending: false,
            generation: 0,
        }
    }

    /// What a `close()` guarantees before the driver has applied it
    fn apply_close(&mut self) {
        self.manual_close = true;
        self.ready_state = ReadyState::Closed;
        self.heartbeat_active = false;
        self.reconnect_pending = false;
        self.phase = match self.phase {
            LifecyclePhase::Connecting | LifecyclePhase::Open | LifecyclePhase::Closing => {
                LifecyclePhase::Closing
            }
            LifecyclePhase::Idle | LifecyclePhase::Closed => LifecyclePhase::Closed,
        };
    }
}

/// Status channel shared by the driver and every handle
struct StatusBoard {
    tx: watch::Sender<ClientStatus>,
    /// Close commands queued but not yet applied by the driver
    pending_closes: AtomicUsize,
}

impl StatusBoard {
    fn new() -> (Arc<Self>, watch::Receiver<ClientStatus>) {
        let (tx, rx) = watch::channel(ClientStatus::initial());
        let board = Arc::new(Self {
            tx,
            pending_closes: AtomicUsize::new(0),
        });
        (board, rx)
    }

    /// Handle side of `close()`. Runs under the channel's write lock so a
    /// concurrent `publish` cannot undo it.
    fn close_requested(&self) {
        self.tx.send_modify(|status| {
            self.pending_closes.fetch_add(1, Ordering::SeqCst);
            status.apply_close();
        });
    }

    fn close_applied(&self) {
        self.pending_closes.fetch_sub(1, Ordering::SeqCst);
    }

    /// Driver side: publish `next`, keeping any close still in the queue
    fn publish(&self, mut next: ClientStatus) {
        self.tx.send_if_modified(|current| {
            if self.pending_closes.load(Ordering::SeqCst) > 0 {
                next.apply_close();
            }
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

#[derive(Debug)]
enum Command {
    Connect,
    Send(Payload),
    Close,
}

/// Handle to a resilient WebSocket connection.
///
/// Every method returns immediately and is safe to call from inside a
/// subscriber. `connect`, `send` and `close` are applied by the driver task
/// in call order; the effect of `close` on `status()` is visible at once.
/// When the last handle is dropped the driver closes the transport and stops.
#[derive(Clone)]
pub struct SocketClient {
    commands: mpsc::UnboundedSender<Command>,
    subscribers: Arc<Subscribers>,
    board: Arc<StatusBoard>,
    status: watch::Receiver<ClientStatus>,
    metrics: Arc<ClientMetrics>,
    config: Arc<ClientConfig>,
}

impl SocketClient {
    /// Create a client over tokio-tungstenite.
    ///
    /// Must be called from within a tokio runtime. Does not connect.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_connector(config, TungsteniteConnector)
    }

    /// Create a client over a custom transport
    pub fn with_connector<C: Connector>(config: ClientConfig, connector: C) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| SocketError::Runtime(e.to_string()))?;

        let config = Arc::new(config);
        let subscribers = Subscribers::new();
        let metrics = Arc::new(ClientMetrics::new());

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (timers_tx, timers_rx) = mpsc::unbounded_channel();
        let (board, status_rx) = StatusBoard::new();

        let driver = Driver {
            reconnect: ReconnectPolicy::new(
                config.reconnect_interval(),
                config.max_reconnect_attempts,
            ),
            reconnect_timer: TimerSlot::new(TimerKind::Reconnect),
            heartbeat: Heartbeat::new(config.heartbeat_interval()),
            config: config.clone(),
            connector,
            transport: None,
            generation: 0,
            phase: LifecyclePhase::Idle,
            manual_close: false,
            subscribers: subscribers.clone(),
            metrics: metrics.clone(),
            board: board.clone(),
            events_tx,
            timers_tx,
        };
        runtime.spawn(driver.run(commands_rx, events_rx, timers_rx));

        tracing::debug!(target: "ws", endpoint = %config.endpoint, "socket client created");

        Ok(Self {
            commands: commands_tx,
            subscribers,
            board,
            status: status_rx,
            metrics,
            config,
        })
    }

    /// Open the connection. Ignored with a warning while already open.
    ///
    /// Starts a fresh lifecycle: clears a previous `close()` and restores the
    /// full reconnect budget.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Send a frame if the socket is open; otherwise it is dropped with a
    /// warning. There is no queueing and no delivery guarantee.
    pub fn send(&self, payload: impl Into<Payload>) {
        self.command(Command::Send(payload.into()));
    }

    /// Serialize `value` as JSON and `send` it as text
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        self.send(Payload::json(value)?);
        Ok(())
    }

    /// Close the connection and stop reconnecting. Idempotent.
    ///
    /// On return `ready_state()` is `Closed` and no timer is reported
    /// pending; the close event follows once the transport has shut down.
    pub fn close(&self) {
        self.board.close_requested();
        self.command(Command::Close);
    }

    fn command(&self, command: Command) {
        if let Err(rejected) = self.commands.send(command) {
            tracing::warn!(target: "ws", command = ?rejected.0, "socket driver has stopped; command ignored");
        }
    }

    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        let id = self.subscribers.message.lock().insert(Arc::new(handler));
        Subscription::new(id, EventKind::Message, &self.subscribers)
    }

    pub fn on_open<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&OpenEvent) + Send + Sync + 'static,
    {
        let id = self.subscribers.open.lock().insert(Arc::new(handler));
        Subscription::new(id, EventKind::Open, &self.subscribers)
    }

    pub fn on_close<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&CloseEvent) + Send + Sync + 'static,
    {
        let id = self.subscribers.close.lock().insert(Arc::new(handler));
        Subscription::new(id, EventKind::Close, &self.subscribers)
    }

    pub fn on_error<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ErrorEvent) + Send + Sync + 'static,
    {
        let id = self.subscribers.error.lock().insert(Arc::new(handler));
        Subscription::new(id, EventKind::Error, &self.subscribers)
    }

    /// Transport readiness; `Closed` when there is no transport
    pub fn ready_state(&self) -> ReadyState {
        self.status.borrow().ready_state
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.status.borrow().phase
    }

    pub fn status(&self) -> ClientStatus {
        *self.status.borrow()
    }

    /// Receiver notified whenever the status changes
    pub fn watch_status(&self) -> watch::Receiver<ClientStatus> {
        self.status.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

/// Owner of the transport, both timers and the state machine
struct Driver<C: Connector> {
    config: Arc<ClientConfig>,
    connector: C,
    transport: Option<C::Transport>,
    /// Id of the current transport; events tagged otherwise are stale
    generation: u64,
    phase: LifecyclePhase,
    manual_close: bool,
    reconnect: ReconnectPolicy,
    reconnect_timer: TimerSlot,
    heartbeat: Heartbeat,
    subscribers: Arc<Subscribers>,
    metrics: Arc<ClientMetrics>,
    board: Arc<StatusBoard>,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
    timers_tx: mpsc::UnboundedSender<TimerFired>,
}

impl<C: Connector> Driver<C> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<TaggedEvent>,
        mut timers: mpsc::UnboundedReceiver<TimerFired>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(tagged) = events.recv() => self.handle_event(tagged),
                Some(fired) = timers.recv() => self.handle_timer(fired),
            }
            self.publish();
        }
        self.shutdown();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                if self.warn_if_open() {
                    return;
                }
                self.manual_close = false;
                self.reconnect.reset();
                self.connect();
            }
            Command::Send(payload) => self.send(payload),
            Command::Close => {
                self.board.close_applied();
                self.close();
            }
        }
    }

    fn handle_event(&mut self, tagged: TaggedEvent) {
        if tagged.generation != self.generation {
            tracing::debug!(
                target: "ws",
                generation = tagged.generation,
                current = self.generation,
                "dropping event from superseded transport"
            );
            return;
        }

        match tagged.event {
            TransportEvent::Open(open) => self.on_open(open),
            TransportEvent::Message(payload) => self.on_message(payload),
            TransportEvent::Error(message) => self.on_error(ErrorEvent {
                source: ErrorSource::Transport,
                message,
            }),
            TransportEvent::Close(close) => self.on_close(close),
        }
    }

    fn handle_timer(&mut self, fired: TimerFired) {
        match fired.kind {
            TimerKind::Heartbeat => {
                if self.heartbeat.accept(fired) {
                    self.beat();
                }
            }
            TimerKind::Reconnect => {
                if self.reconnect_timer.accept(fired) && !self.warn_if_open() {
                    tracing::info!(
                        target: "ws",
                        attempt = self.reconnect.used(),
                        max = self.reconnect.max_attempts(),
                        "reconnecting"
                    );
                    self.connect();
                }
            }
        }
    }

    fn warn_if_open(&self) -> bool {
        let open = self.is_open();
        if open {
            tracing::warn!(
                target: "ws",
                endpoint = %self.config.endpoint,
                "connect requested while already open; ignoring"
            );
        }
        open
    }

    /// Create a new transport. Construction failures go straight to the
    /// reconnect path.
    fn connect(&mut self) {
        self.reconnect_timer.cancel();

        if let Some(mut superseded) = self.transport.take() {
            tracing::debug!(
                target: "ws",
                generation = self.generation,
                "closing transport superseded before it opened"
            );
            superseded.close();
        }

        self.generation += 1;
        self.phase = LifecyclePhase::Connecting;
        let sink = EventSink::new(self.generation, self.events_tx.clone());

        match self.connector.open(&self.config, sink) {
            Ok(transport) => {
                tracing::info!(
                    target: "ws",
                    endpoint = %self.config.endpoint,
                    generation = self.generation,
                    "connecting"
                );
                self.transport = Some(transport);
            }
            Err(e) => {
                tracing::error!(
                    target: "ws",
                    endpoint = %self.config.endpoint,
                    error = %e,
                    "failed to create transport"
                );
                self.metrics.record_error();
                self.phase = LifecyclePhase::Closed;
                self.publish();
                dispatch(
                    &self.subscribers.error,
                    EventKind::Error,
                    &ErrorEvent {
                        source: ErrorSource::Construction,
                        message: e.to_string(),
                    },
                );
                self.schedule_reconnect();
            }
        }
    }

    fn send(&mut self, payload: Payload) {
        let len = payload.len();
        match self.transport.as_mut() {
            Some(transport) if transport.ready_state() == ReadyState::Open => {
                match transport.send(payload) {
                    Ok(()) => self.metrics.record_sent(),
                    Err(e) => {
                        self.metrics.record_dropped();
                        tracing::warn!(target: "ws", error = %e, len, "send failed; message dropped");
                    }
                }
            }
            _ => {
                self.metrics.record_dropped();
                tracing::warn!(
                    target: "ws",
                    ready_state = ?self.ready_state(),
                    len,
                    "socket not open; message dropped"
                );
            }
        }
    }

    fn close(&mut self) {
        self.manual_close = true;
        self.heartbeat.stop();
        self.reconnect_timer.cancel();

        match self.transport.take() {
            Some(mut transport) => {
                tracing::info!(
                    target: "ws",
                    endpoint = %self.config.endpoint,
                    generation = self.generation,
                    "closing connection"
                );
                transport.close();
                self.phase = LifecyclePhase::Closing;
            }
            None => {
                if self.phase != LifecyclePhase::Closing {
                    self.phase = LifecyclePhase::Closed;
                }
            }
        }
    }

    fn on_open(&mut self, open: OpenEvent) {
        if self.transport.is_none() {
            tracing::debug!(target: "ws", "open after the transport was released; ignoring");
            return;
        }

        self.phase = LifecyclePhase::Open;
        self.reconnect.reset();
        self.heartbeat.start(&self.timers_tx);
        self.metrics.record_open();
        tracing::info!(
            target: "ws",
            endpoint = %self.config.endpoint,
            protocol = ?open.protocol,
            generation = self.generation,
            "connection open"
        );

        self.publish();
        dispatch(&self.subscribers.open, EventKind::Open, &open);
    }

    fn on_message(&mut self, payload: Payload) {
        self.metrics.record_received();
        let message = InboundMessage::decode(payload);
        dispatch(&self.subscribers.message, EventKind::Message, &message);
    }

    fn on_error(&mut self, error: ErrorEvent) {
        self.metrics.record_error();
        tracing::warn!(
            target: "ws",
            endpoint = %self.config.endpoint,
            error = %error.message,
            "transport error"
        );
        dispatch(&self.subscribers.error, EventKind::Error, &error);
    }

    fn on_close(&mut self, close: CloseEvent) {
        self.heartbeat.stop();
        self.transport = None;
        self.phase = LifecyclePhase::Closed;
        self.metrics.record_close();
        tracing::info!(
            target: "ws",
            endpoint = %self.config.endpoint,
            code = close.code,
            reason = %close.reason,
            was_clean = close.was_clean,
            manual = self.manual_close,
            "connection closed"
        );

        self.publish();
        dispatch(&self.subscribers.close, EventKind::Close, &close);

        if !self.manual_close {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        match self.reconnect.next_attempt() {
            Some((attempt, delay)) => {
                tracing::info!(
                    target: "ws",
                    attempt,
                    max = self.reconnect.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                self.metrics.record_reconnect();
                self.reconnect_timer.start_once(delay, &self.timers_tx);
            }
            None => {
                tracing::warn!(
                    target: "ws",
                    endpoint = %self.config.endpoint,
                    max = self.reconnect.max_attempts(),
                    "reconnect attempts exhausted; waiting for an explicit connect"
                );
            }
        }
    }

    /// Heartbeat tick: skipped if the socket closed since the timer fired
    fn beat(&mut self) {
        match self.transport.as_mut() {
            Some(transport) if transport.ready_state() == ReadyState::Open => {
                match transport.send(Heartbeat::payload()) {
                    Ok(()) => {
                        self.metrics.record_heartbeat();
                        tracing::trace!(target: "ws", "heartbeat sent");
                    }
                    Err(e) => tracing::debug!(target: "ws", error = %e, "heartbeat not sent"),
                }
            }
            _ => tracing::debug!(target: "ws", "socket not open at heartbeat tick; skipped"),
        }
    }

    #[inline]
    fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    fn ready_state(&self) -> ReadyState {
        self.transport
            .as_ref()
            .map(|transport| transport.ready_state())
            .unwrap_or(ReadyState::Closed)
    }

    fn publish(&self) {
        let next = ClientStatus {
            phase: self.phase,
            ready_state: self.ready_state(),
            reconnect_attempts: self.reconnect.used(),
            manual_close: self.manual_close,
            heartbeat_active: self.heartbeat.is_active(),
            reconnect_pending: self.reconnect_timer.is_active(),
            generation: self.generation,
        };
        self.board.publish(next);
    }

    /// Every handle is gone
    fn shutdown(&mut self) {
        self.heartbeat.stop();
        self.reconnect_timer.cancel();
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        tracing::debug!(target: "ws", endpoint = %self.config.endpoint, "socket driver stopped");
    }
}
