//! Heartbeat monitoring for a live session link.
//!
//! Owned by the channel's run loop. Tracks inbound activity and the
//! outstanding heartbeat, if any.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Duration,
    last_received: Instant,
    /// Send time of the heartbeat still awaiting any inbound frame.
    outstanding: Option<Instant>,
}

impl HeartbeatMonitor {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
            last_received: Instant::now(),
            outstanding: None,
        }
    }

    /// How often the run loop should evaluate the monitor.
    pub fn check_period(&self) -> Duration {
        (self.interval / 2).max(Duration::from_millis(1))
    }

    /// Any inbound frame proves the link is alive.
    pub fn record_received(&mut self) {
        self.last_received = Instant::now();
        if let Some(sent) = self.outstanding.take() {
            debug!(rtt_ms = sent.elapsed().as_millis() as u64, "Heartbeat answered");
        }
    }

    pub fn record_sent(&mut self) {
        self.outstanding = Some(Instant::now());
    }

    pub fn is_timed_out(&self) -> bool {
        self.outstanding
            .map(|sent| sent.elapsed() > self.timeout)
            .unwrap_or(false)
    }

    /// Idle for a full interval with nothing outstanding.
    pub fn should_send(&self) -> bool {
        self.outstanding.is_none() && self.last_received.elapsed() >= self.interval
    }
}
