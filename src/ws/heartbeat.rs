//! Keep-alive heartbeat
//!
//! While the socket is open a `{"type":"ping"}` text frame goes out every
//! `interval`. There is no pong matching; the heartbeat only keeps
//! intermediaries from timing the connection out.

use crate::ws::message::{Payload, HEARTBEAT_MESSAGE};
use crate::ws::timer::{TimerFired, TimerKind, TimerSlot};
use std::time::Duration;
use tokio::sync::mpsc;

pub struct Heartbeat {
    /// Ping interval
    interval: Duration,
    /// At most one running ticker
    slot: TimerSlot,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            slot: TimerSlot::new(TimerKind::Heartbeat),
        }
    }

    /// Start ticking, replacing any running ticker
    pub fn start(&mut self, tx: &mpsc::UnboundedSender<TimerFired>) {
        self.slot.start_interval(self.interval, tx);
    }

    /// Stop ticking. Returns whether a ticker was running.
    pub fn stop(&mut self) -> bool {
        self.slot.cancel()
    }

    /// Whether `fired` is a tick of the running ticker
    pub fn accept(&mut self, fired: TimerFired) -> bool {
        self.slot.accept(fired)
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.slot.is_active()
    }

    /// The keep-alive frame
    #[inline]
    pub fn payload() -> Payload {
        Payload::Text(HEARTBEAT_MESSAGE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_stopped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut heartbeat = Heartbeat::new(Duration::from_millis(30));

        heartbeat.start(&tx);
        assert!(heartbeat.is_active());

        let tick = rx.recv().await.unwrap();
        assert!(heartbeat.accept(tick));
        // Interval ticks stay live
        assert!(heartbeat.is_active());

        assert!(heartbeat.stop());
        assert!(!heartbeat.is_active());
        tokio::time::sleep(Duration::from_millis(200)).await;
        while let Ok(stale) = rx.try_recv() {
            assert!(!heartbeat.accept(stale));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_keeps_single_ticker() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut heartbeat = Heartbeat::new(Duration::from_millis(10));

        heartbeat.start(&tx);
        heartbeat.start(&tx);
        tokio::time::sleep(Duration::from_millis(35)).await;

        let mut accepted = 0;
        while let Ok(tick) = rx.try_recv() {
            if heartbeat.accept(tick) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 3);
    }

    #[test]
    fn test_payload_is_ping() {
        assert_eq!(Heartbeat::payload().as_text(), Some(r#"{"type":"ping"}"#));
    }
}
