//! Metrics collection for the socket client
//!
//! Lock-free counters updated by the client's driver task and read through
//! snapshots by any handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime};

/// Client metrics collector
pub struct ClientMetrics {
    /// Inbound messages delivered to subscribers
    messages_received: AtomicU64,
    /// Outbound messages handed to the transport (heartbeats excluded)
    messages_sent: AtomicU64,
    /// Outbound messages dropped because the socket was not open
    sends_dropped: AtomicU64,
    /// Keep-alive pings written
    heartbeats_sent: AtomicU64,
    /// Reconnect attempts scheduled
    reconnects_scheduled: AtomicU64,
    /// Transport open events
    opens: AtomicU64,
    /// Transport close events
    closes: AtomicU64,
    /// Transport errors and construction failures
    errors: AtomicU64,
    /// Last inbound message timestamp (Unix millis)
    last_message_time: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

/// Metrics snapshot for export
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub messages_sent: u64,
    pub sends_dropped: u64,
    pub heartbeats_sent: u64,
    pub reconnects_scheduled: u64,
    pub opens: u64,
    pub closes: u64,
    pub errors: u64,
    pub message_rate: f64, // inbound messages per second
    pub uptime_seconds: u64,
}

impl ClientMetrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            sends_dropped: AtomicU64::new(0),
            heartbeats_sent: AtomicU64::new(0),
            reconnects_scheduled: AtomicU64::new(0),
            opens: AtomicU64::new(0),
            closes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_message_time: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.update_last_message_time();
    }

    #[inline]
    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped(&self) {
        self.sends_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_heartbeat(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reconnect(&self) {
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_open(&self) {
        self.opens.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_close(&self) {
        self.closes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn update_last_message_time(&self) {
        self.last_message_time.store(unix_millis(), Ordering::Relaxed);
    }

    /// Get current snapshot of metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let received = self.messages_received.load(Ordering::Relaxed);
        let uptime = self.start_time.elapsed().as_secs();
        let rate = if uptime > 0 {
            received as f64 / uptime as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            messages_received: received,
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            sends_dropped: self.sends_dropped.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
            opens: self.opens.load(Ordering::Relaxed),
            closes: self.closes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            message_rate: rate,
            uptime_seconds: uptime,
        }
    }

    /// Milliseconds since the last inbound message, capped at 10000ms
    pub fn idle_ms(&self) -> u64 {
        let last = self.last_message_time.load(Ordering::Relaxed);
        if last == 0 {
            return 10000; // No messages yet
        }
        unix_millis().saturating_sub(last).min(10000)
    }
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = ClientMetrics::new();
        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.messages_received, 0);
        assert_eq!(snapshot.sends_dropped, 0);
        assert_eq!(snapshot.reconnects_scheduled, 0);
        assert_eq!(snapshot.message_rate, 0.0);
    }

    #[test]
    fn test_record_counters() {
        let metrics = ClientMetrics::new();

        metrics.record_received();
        metrics.record_received();
        metrics.record_sent();
        metrics.record_dropped();
        metrics.record_heartbeat();
        metrics.record_reconnect();
        metrics.record_open();
        metrics.record_close();
        metrics.record_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_received, 2);
        assert_eq!(snapshot.messages_sent, 1);
        assert_eq!(snapshot.sends_dropped, 1);
        assert_eq!(snapshot.heartbeats_sent, 1);
        assert_eq!(snapshot.reconnects_scheduled, 1);
        assert_eq!(snapshot.opens, 1);
        assert_eq!(snapshot.closes, 1);
        assert_eq!(snapshot.errors, 1);
    }

    #[test]
    fn test_idle_no_messages() {
        let metrics = ClientMetrics::new();
        assert_eq!(metrics.idle_ms(), 10000);

        metrics.record_received();
        assert!(metrics.idle_ms() < 10000);
    }
}
