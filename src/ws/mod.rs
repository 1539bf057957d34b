//! WebSocket client with heartbeat and automatic reconnect

pub mod client;
pub mod connection;
pub mod heartbeat;
pub mod message;
pub mod reconnect;
pub mod registry;
pub mod timer;
pub mod transport;

pub use client::{ClientStatus, LifecyclePhase, SocketClient};
pub use connection::{build_request, TungsteniteConnector, WebSocketConnection};
pub use message::{InboundMessage, Payload, HEARTBEAT_MESSAGE};
pub use registry::{EventKind, Subscription, SubscriptionId};
pub use transport::{
    CloseEvent, Connector, ErrorEvent, ErrorSource, EventSink, OpenEvent, ReadyState, Transport,
    TransportEvent,
};
