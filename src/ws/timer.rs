//! Single-slot timers
//!
//! A `TimerSlot` holds at most one live timer. Starting a timer cancels the
//! one already in the slot. Each start gets a fresh epoch, and a firing is
//! only honoured if its epoch is still current, so a firing that was already
//! queued when its timer got cancelled is ignored.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

/// Which slot a firing belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Heartbeat,
    Reconnect,
}

/// Timer expiry delivered to the owning task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    pub epoch: u64,
}

pub struct TimerSlot {
    kind: TimerKind,
    epoch: u64,
    handle: Option<JoinHandle<()>>,
    repeating: bool,
}

impl TimerSlot {
    pub fn new(kind: TimerKind) -> Self {
        Self {
            kind,
            epoch: 0,
            handle: None,
            repeating: false,
        }
    }

    /// Fire every `period`, first after one full period
    pub fn start_interval(&mut self, period: Duration, tx: &mpsc::UnboundedSender<TimerFired>) {
        let fired = self.arm(true);
        let tx = tx.clone();
        self.handle = Some(tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if tx.send(fired).is_err() {
                    break;
                }
            }
        }));
    }

    /// Fire once after `delay`
    pub fn start_once(&mut self, delay: Duration, tx: &mpsc::UnboundedSender<TimerFired>) {
        let fired = self.arm(false);
        let tx = tx.clone();
        self.handle = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(fired);
        }));
    }

    fn arm(&mut self, repeating: bool) -> TimerFired {
        self.cancel();
        self.epoch += 1;
        self.repeating = repeating;
        TimerFired {
            kind: self.kind,
            epoch: self.epoch,
        }
    }

    /// Cancel the live timer, if any. Returns whether one was live.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                // Invalidate anything already queued
                self.epoch += 1;
                true
            }
            None => false,
        }
    }

    /// Whether `fired` comes from the live timer. A one-shot timer that is
    /// accepted leaves the slot empty.
    pub fn accept(&mut self, fired: TimerFired) -> bool {
        if fired.kind != self.kind || fired.epoch != self.epoch || self.handle.is_none() {
            return false;
        }
        if !self.repeating {
            self.handle = None;
        }
        true
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
