//! Resilient socket client demo
//!
//! Connects to the configured endpoint (or the one given as the first
//! argument), logs everything it receives and closes cleanly on Ctrl-C.
//!
//! ```text
//! resilient-socket [ws://host:port/path]
//! ```

use anyhow::Context;
use resilient_socket::infrastructure::init_logging;
use resilient_socket::{Config, InboundMessage, LifecyclePhase, SocketClient};
use std::time::Duration;

/// Wait this long for the close handshake on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(endpoint) = std::env::args().nth(1) {
        config.client.endpoint = endpoint;
    }

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_logging(&config.logging).context("failed to initialise logging")?;

    let client = SocketClient::new(config.client.clone()).context("invalid client configuration")?;

    client.on_open(|open| {
        tracing::info!(protocol = ?open.protocol, "connected");
    });
    client.on_message(|message| match message {
        InboundMessage::Structured(value) => tracing::info!(%value, "message"),
        InboundMessage::Raw(payload) => {
            tracing::info!(len = payload.len(), text = ?payload.as_text(), "raw message")
        }
    });
    client.on_close(|close| {
        tracing::info!(code = close.code, reason = %close.reason, "disconnected");
    });
    client.on_error(|error| {
        tracing::warn!(source = ?error.source, error = %error.message, "socket error");
    });

    tracing::info!(endpoint = %client.config().endpoint, "starting");
    client.connect();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");
    client.close();

    let mut status = client.watch_status();
    let closed = status.wait_for(|s| s.phase == LifecyclePhase::Closed);
    if tokio::time::timeout(SHUTDOWN_GRACE, closed).await.is_err() {
        tracing::warn!("close handshake did not finish in time");
    }

    let metrics = client.metrics();
    tracing::info!(
        received = metrics.messages_received,
        sent = metrics.messages_sent,
        dropped = metrics.sends_dropped,
        heartbeats = metrics.heartbeats_sent,
        reconnects = metrics.reconnects_scheduled,
        "final metrics"
    );

    Ok(())
}
