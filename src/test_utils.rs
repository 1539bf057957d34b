//! In-memory transport for driving the client in tests
//!
//! `MockConnector` hands out transports whose far end is a `MockRemote` the
//! test controls: accept the handshake, push frames, fail, or drop the line.

use crate::infrastructure::config::ClientConfig;
use crate::ws::message::{Payload, HEARTBEAT_MESSAGE};
use crate::ws::transport::{
    CloseEvent, Connector, EventSink, OpenEvent, ReadyState, Transport, TransportEvent,
};
use crate::{Result, SocketError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a freshly created mock transport does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Handshake succeeds immediately
    Open,
    /// Handshake fails: error then abnormal close
    Refuse,
    /// `Connector::open` itself fails
    Throw,
    /// Stays connecting until the test calls `MockRemote::accept`
    Pending,
}

struct Shared {
    script: VecDeque<Behavior>,
    fallback: Behavior,
    attempts: usize,
    remotes: Vec<MockRemote>,
}

#[derive(Clone)]
pub struct MockConnector {
    shared: Arc<Mutex<Shared>>,
}

impl MockConnector {
    /// Every transport behaves as `behavior`
    pub fn new(behavior: Behavior) -> Self {
        Self::with_script([], behavior)
    }

    /// Play `script` in order, then `fallback` forever
    pub fn with_script(script: impl IntoIterator<Item = Behavior>, fallback: Behavior) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                script: script.into_iter().collect(),
                fallback,
                attempts: 0,
                remotes: Vec::new(),
            })),
        }
    }

    /// Calls to `open`, failed ones included
    pub fn attempts(&self) -> usize {
        self.shared.lock().attempts
    }

    /// Far end of the `index`-th transport that was built
    pub fn remote(&self, index: usize) -> MockRemote {
        self.shared.lock().remotes[index].clone()
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    fn open(&mut self, config: &ClientConfig, events: EventSink) -> Result<MockTransport> {
        let mut shared = self.shared.lock();
        shared.attempts += 1;
        let behavior = shared.script.pop_front().unwrap_or(shared.fallback);

        if behavior == Behavior::Throw {
            return Err(SocketError::InvalidEndpoint {
                endpoint: config.endpoint.clone(),
                reason: "scripted construction failure".to_string(),
            });
        }

        let remote = MockRemote {
            inner: Arc::new(RemoteInner {
                state: AtomicU8::new(ReadyState::Connecting as u8),
                sent: Mutex::new(Vec::new()),
                closed_by_client: AtomicBool::new(false),
                events,
            }),
        };
        shared.remotes.push(remote.clone());

        match behavior {
            Behavior::Open => remote.accept(),
            Behavior::Refuse => {
                remote.error("connection refused");
                remote.drop_connection();
            }
            Behavior::Pending | Behavior::Throw => {}
        }

        Ok(MockTransport { remote })
    }
}

struct RemoteInner {
    state: AtomicU8,
    sent: Mutex<Vec<Payload>>,
    closed_by_client: AtomicBool,
    events: EventSink,
}

/// Server side of a mock transport
#[derive(Clone)]
pub struct MockRemote {
    inner: Arc<RemoteInner>,
}

impl MockRemote {
    /// Complete the handshake
    pub fn accept(&self) {
        self.set_state(ReadyState::Open);
        self.emit(TransportEvent::Open(OpenEvent::default()));
    }

    /// Push an inbound frame
    pub fn deliver(&self, payload: impl Into<Payload>) {
        self.emit(TransportEvent::Message(payload.into()));
    }

    pub fn error(&self, message: &str) {
        self.emit(TransportEvent::Error(message.to_string()));
    }

    /// Lose the connection without a close handshake
    pub fn drop_connection(&self) {
        self.set_state(ReadyState::Closed);
        self.emit(TransportEvent::Close(CloseEvent::abnormal("connection lost")));
    }

    /// Stop carrying frames without reporting anything, as a line that dies
    /// between two events
    pub fn go_quiet(&self) {
        self.set_state(ReadyState::Closed);
    }

    /// Frames the client wrote, heartbeats included
    pub fn sent(&self) -> Vec<Payload> {
        self.inner.sent.lock().clone()
    }

    /// Heartbeat frames the client wrote
    pub fn pings(&self) -> usize {
        self.inner
            .sent
            .lock()
            .iter()
            .filter(|p| p.as_text() == Some(HEARTBEAT_MESSAGE))
            .count()
    }

    pub fn closed_by_client(&self) -> bool {
        self.inner.closed_by_client.load(Ordering::SeqCst)
    }

    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ReadyState) {
        self.inner.state.store(state as u8, Ordering::SeqCst);
    }

    fn emit(&self, event: TransportEvent) {
        self.inner.events.emit(event);
    }
}

/// Client side of a mock transport
pub struct MockTransport {
    remote: MockRemote,
}

impl Transport for MockTransport {
    fn send(&mut self, payload: Payload) -> Result<()> {
        if self.remote.ready_state() != ReadyState::Open {
            return Err(SocketError::TransportClosed);
        }
        self.remote.inner.sent.lock().push(payload);
        Ok(())
    }

    fn close(&mut self) {
        match self.remote.ready_state() {
            ReadyState::Connecting | ReadyState::Open => {
                self.remote
                    .inner
                    .closed_by_client
                    .store(true, Ordering::SeqCst);
                self.remote.set_state(ReadyState::Closed);
                self.remote
                    .emit(TransportEvent::Close(CloseEvent::normal()));
            }
            ReadyState::Closing | ReadyState::Closed => {}
        }
    }

    fn ready_state(&self) -> ReadyState {
        self.remote.ready_state()
    }
}

/// Collects every event a subscriber sees
pub struct Recorder<E> {
    seen: Arc<Mutex<Vec<E>>>,
}

impl<E: Clone + Send + 'static> Recorder<E> {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn handler(&self) -> impl Fn(&E) + Send + Sync + 'static {
        let seen = self.seen.clone();
        move |event: &E| seen.lock().push(event.clone())
    }

    pub fn events(&self) -> Vec<E> {
        self.seen.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }
}

/// Let the driver drain everything already queued
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
