//! Transport abstraction
//!
//! The client drives any duplex, event-emitting connection through these
//! traits. `connection::TungsteniteConnector` is the production
//! implementation; tests plug in an in-memory one.

use crate::infrastructure::config::ClientConfig;
use crate::ws::message::Payload;
use crate::Result;
use tokio::sync::mpsc;

/// Transport readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReadyState {
    /// Handshake in progress
    Connecting = 0,
    /// Connected and ready
    Open = 1,
    /// Close handshake in progress
    Closing = 2,
    /// Closed or never opened
    Closed = 3,
}

impl ReadyState {
    #[inline]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// Payload of a transport open event
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OpenEvent {
    /// Sub-protocol selected by the server, if any
    pub protocol: Option<String>,
}

/// Payload of a transport close event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    /// RFC 6455 close code
    pub code: u16,
    pub reason: String,
    /// Whether the close handshake completed
    pub was_clean: bool,
}

impl CloseEvent {
    /// Normal closure (1000)
    pub const NORMAL: u16 = 1000;
    /// Close frame without a status code (1005)
    pub const NO_STATUS: u16 = 1005;
    /// Connection dropped without a close frame (1006)
    pub const ABNORMAL: u16 = 1006;

    pub fn normal() -> Self {
        Self {
            code: Self::NORMAL,
            reason: String::new(),
            was_clean: true,
        }
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: Self::ABNORMAL,
            reason: reason.into(),
            was_clean: false,
        }
    }
}

/// Where an error event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    /// The transport could not be created
    Construction,
    /// The live transport reported an error
    Transport,
}

/// Payload of an error event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub source: ErrorSource,
    pub message: String,
}

/// Events a transport reports back to the client
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open(OpenEvent),
    Message(Payload),
    Error(String),
    Close(CloseEvent),
}

/// Transport event tagged with the connection it came from
#[derive(Debug)]
pub(crate) struct TaggedEvent {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Channel a transport reports its events on.
///
/// Bound to a single connection; events emitted after the client has moved
/// on to a newer connection are discarded.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self { generation, tx }
    }

    /// Report an event. Returns false once the client is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(TaggedEvent {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    /// Connection this sink belongs to
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// A live (or opening) connection
pub trait Transport: Send + 'static {
    /// Queue a frame. Must not block.
    fn send(&mut self, payload: Payload) -> Result<()>;

    /// Start the close handshake. The final `Close` event is still emitted.
    fn close(&mut self);

    fn ready_state(&self) -> ReadyState;
}

/// Factory for transports
pub trait Connector: Send + 'static {
    type Transport: Transport;

    /// Begin connecting to `config.endpoint` offering `config.sub_protocols`.
    ///
    /// Returns immediately; the outcome arrives on `events` as `Open`, or as
    /// `Error` and/or `Close`. An `Err` means no transport could be built at
    /// all and no events will follow.
    fn open(&mut self, config: &ClientConfig, events: EventSink) -> Result<Self::Transport>;
}
