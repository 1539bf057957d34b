//! Production WebSocket transport
//!
//! tokio-tungstenite connection driven by a background task:
//! - Handshake bounded by `connect_timeout`
//! - Sub-protocols offered via `Sec-WebSocket-Protocol`
//! - TCP_NODELAY on plain connections
//! - Close handshake bounded by `CLOSE_TIMEOUT`
//!
//! Every outcome is reported through the `EventSink`; nothing is returned to
//! the caller after `open`.

use crate::infrastructure::config::ClientConfig;
use crate::ws::message::Payload;
use crate::ws::transport::{
    CloseEvent, Connector, EventSink, OpenEvent, ReadyState, Transport, TransportEvent,
};
use crate::{Result, SocketError};

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::{Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

/// How long to wait for the peer's close frame after sending ours
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens `WebSocketConnection`s
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    type Transport = WebSocketConnection;

    fn open(&mut self, config: &ClientConfig, events: EventSink) -> Result<WebSocketConnection> {
        let request = build_request(&config.endpoint, &config.sub_protocols)?;
        Ok(WebSocketConnection::spawn(
            request,
            config.endpoint.clone(),
            config.connect_timeout(),
            events,
        ))
    }
}

/// Build the handshake request.
///
/// Rejects what a browser would refuse up front: unparseable URLs, schemes
/// other than ws/wss, fragments, and empty, malformed or duplicate
/// sub-protocol names.
pub fn build_request(endpoint: &str, sub_protocols: &[String]) -> Result<Request> {
    let invalid = |reason: String| SocketError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };

    let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(invalid(format!("unsupported scheme '{}'", other))),
    }
    if url.fragment().is_some() {
        return Err(invalid("fragments are not allowed".to_string()));
    }

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| SocketError::Request(e.to_string()))?;

    if !sub_protocols.is_empty() {
        for (i, protocol) in sub_protocols.iter().enumerate() {
            if !is_token(protocol) {
                return Err(SocketError::Request(format!(
                    "invalid sub-protocol '{}'",
                    protocol
                )));
            }
            if sub_protocols[..i].contains(protocol) {
                return Err(SocketError::Request(format!(
                    "duplicate sub-protocol '{}'",
                    protocol
                )));
            }
        }
        let value = HeaderValue::from_str(&sub_protocols.join(", "))
            .map_err(|e| SocketError::Request(e.to_string()))?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
    }

    Ok(request)
}

/// RFC 7230 token
fn is_token(value: &str) -> bool {
    !value.is_empty()
        && value.bytes().all(|b| {
            b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b)
        })
}

fn negotiated_protocol(response: &Response) -> Option<String> {
    response
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Commands from the handle to the connection task
#[derive(Debug)]
enum Outgoing {
    Frame(Message),
    Close,
}

/// Handle to a tokio-tungstenite connection running on its own task.
///
/// Dropping the handle closes the connection.
pub struct WebSocketConnection {
    /// Frames and close requests for the connection task
    outgoing: mpsc::UnboundedSender<Outgoing>,
    /// Shared with the connection task
    state: Arc<AtomicU8>,
    /// Connection URL
    endpoint: String,
}

impl WebSocketConnection {
    fn spawn(
        request: Request,
        endpoint: String,
        connect_timeout: Duration,
        events: EventSink,
    ) -> Self {
        let (outgoing, commands) = mpsc::unbounded_channel();
        let state = Arc::new(AtomicU8::new(ReadyState::Connecting as u8));

        tokio::spawn(run_connection(
            request,
            connect_timeout,
            state.clone(),
            commands,
            events,
        ));

        Self {
            outgoing,
            state,
            endpoint,
        }
    }

    /// Get connection URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for WebSocketConnection {
    fn send(&mut self, payload: Payload) -> Result<()> {
        let message = match payload {
            Payload::Text(text) => Message::text(text),
            Payload::Binary(data) => Message::binary(data),
        };
        self.outgoing
            .send(Outgoing::Frame(message))
            .map_err(|_| SocketError::TransportClosed)
    }

    fn close(&mut self) {
        match self.ready_state() {
            ReadyState::Connecting | ReadyState::Open => {
                store_state(&self.state, ReadyState::Closing);
                let _ = self.outgoing.send(Outgoing::Close);
            }
            ReadyState::Closing | ReadyState::Closed => {}
        }
    }

    #[inline]
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::Acquire))
    }
}

#[inline]
fn store_state(state: &AtomicU8, ready: ReadyState) {
    state.store(ready as u8, Ordering::Release);
}

async fn run_connection(
    request: Request,
    connect_timeout: Duration,
    state: Arc<AtomicU8>,
    mut commands: mpsc::UnboundedReceiver<Outgoing>,
    events: EventSink,
) {
    let handshake = timeout(connect_timeout, connect_async(request));

    let (ws, response) = tokio::select! {
        result = handshake => match result {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return fail(&state, &events, e.to_string()),
            Err(_) => return fail(&state, &events, "connect timed out".to_string()),
        },
        _ = wait_for_close(&mut commands) => {
            store_state(&state, ReadyState::Closed);
            events.emit(TransportEvent::Close(CloseEvent::abnormal(
                "closed before the connection was established",
            )));
            return;
        }
    };

    if let MaybeTlsStream::Plain(tcp) = ws.get_ref() {
        // Disable Nagle's algorithm - send frames immediately
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!(target: "ws", error = %e, "failed to set TCP_NODELAY");
        }
    }

    // A close requested during the handshake already moved us to Closing
    if state
        .compare_exchange(
            ReadyState::Connecting as u8,
            ReadyState::Open as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_ok()
    {
        events.emit(TransportEvent::Open(OpenEvent {
            protocol: negotiated_protocol(&response),
        }));
    }

    let (mut sink, mut stream) = ws.split();

    let close_event = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Outgoing::Frame(message)) => {
                    if let Err(e) = sink.send(message).await {
                        events.emit(TransportEvent::Error(e.to_string()));
                        break CloseEvent::abnormal(e.to_string());
                    }
                }
                Some(Outgoing::Close) | None => {
                    store_state(&state, ReadyState::Closing);
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: String::new().into(),
                    };
                    if sink.send(Message::Close(Some(frame))).await.is_err() {
                        break CloseEvent::abnormal("connection dropped during close handshake");
                    }
                    break await_close_reply(&mut stream).await;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    events.emit(TransportEvent::Message(Payload::Text(text.as_str().to_owned())));
                }
                Some(Ok(Message::Binary(data))) => {
                    events.emit(TransportEvent::Message(Payload::Binary(data)));
                }
                Some(Ok(Message::Close(frame))) => {
                    store_state(&state, ReadyState::Closing);
                    // Pushes out the close reply tungstenite queued
                    let _ = sink.flush().await;
                    break close_from_frame(frame);
                }
                Some(Ok(_)) => {} // Ping/Pong handled by tungstenite
                Some(Err(e)) => {
                    events.emit(TransportEvent::Error(e.to_string()));
                    break CloseEvent::abnormal(e.to_string());
                }
                None => break CloseEvent::abnormal("connection dropped"),
            }
        }
    };

    store_state(&state, ReadyState::Closed);
    events.emit(TransportEvent::Close(close_event));
}

/// Resolves once a close is requested or the handle is dropped.
/// Frames queued before open are discarded.
async fn wait_for_close(commands: &mut mpsc::UnboundedReceiver<Outgoing>) {
    while let Some(command) = commands.recv().await {
        if let Outgoing::Close = command {
            return;
        }
    }
}

async fn await_close_reply(stream: &mut SplitStream<WsStream>) -> CloseEvent {
    let reply = async {
        while let Some(inbound) = stream.next().await {
            match inbound {
                Ok(Message::Close(frame)) => return close_from_frame(frame),
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        CloseEvent::abnormal("connection dropped during close handshake")
    };

    timeout(CLOSE_TIMEOUT, reply)
        .await
        .unwrap_or_else(|_| CloseEvent::abnormal("close handshake timed out"))
}

fn close_from_frame(frame: Option<CloseFrame>) -> CloseEvent {
    match frame {
        Some(frame) => CloseEvent {
            code: u16::from(frame.code),
            reason: frame.reason.to_string(),
            was_clean: true,
        },
        None => CloseEvent {
            code: CloseEvent::NO_STATUS,
            reason: String::new(),
            was_clean: true,
        },
    }
}

/// Failed handshake: error event, then an abnormal close
fn fail(state: &AtomicU8, events: &EventSink, reason: String) {
    store_state(state, ReadyState::Closed);
    events.emit(TransportEvent::Error(reason.clone()));
    events.emit(TransportEvent::Close(CloseEvent::abnormal(reason)));
}
