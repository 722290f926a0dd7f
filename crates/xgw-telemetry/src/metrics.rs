//! Prometheus metrics for the xgw gateway.
//!
//! Covers:
//! - Channel connection state and reconnects
//! - Inbound frame filtering (stale epoch, duplicate sequence, gaps)
//! - Event application outcomes
//! - Handoff queue overflow
//! - Reconciliation sweep corrections
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, which is a startup-fatal programming error.
//! These panics only occur during static initialization, never at runtime.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_int_counter, register_int_gauge,
    CounterVec, Encoder, GaugeVec, IntCounter, IntGauge, TextEncoder,
};

/// Session channel connection state (1 = connected, 0 = disconnected).
pub static CHANNEL_CONNECTED: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "xgw_channel_connected",
        "Session channel connection state (1=connected)",
        &["channel"]
    )
    .unwrap()
});

/// Total reconnection attempts.
pub static CHANNEL_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "xgw_channel_reconnect_total",
        "Total session channel reconnection attempts",
        &["channel", "reason"]
    )
    .unwrap()
});

/// Inbound frames discarded before reaching the store.
/// Labels: reason (stale_epoch/duplicate_seq/sequence_gap)
pub static INBOUND_DISCARDED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "xgw_inbound_discarded_total",
        "Inbound frames discarded by the channel registry",
        &["channel", "reason"]
    )
    .unwrap()
});

/// Event application outcomes.
/// Labels: kind (fill/venue_ack/...), outcome (applied/noop/deferred/dropped)
pub static EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "xgw_events_total",
        "Venue events by kind and outcome",
        &["kind", "outcome"]
    )
    .unwrap()
});

/// Snapshots spilled to the overflow deque because the ring was full.
pub static HANDOFF_OVERFLOW_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "xgw_handoff_overflow_total",
        "Order snapshots spilled past the full handoff ring"
    )
    .unwrap()
});

/// Corrections made by reconciliation sweeps.
/// Labels: kind (acks/rejects/inferred_fills/cancels/unknown)
pub static SWEEP_CORRECTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "xgw_sweep_corrections_total",
        "Corrections applied by reconciliation sweeps",
        &["kind"]
    )
    .unwrap()
});

/// Total sweeps run.
pub static SWEEPS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("xgw_sweeps_total", "Reconciliation sweeps run").unwrap()
});

/// Orders currently held in the live map.
pub static LIVE_ORDERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("xgw_live_orders", "Orders currently in the live map").unwrap()
});

/// Metrics recording helpers.
pub struct Metrics;

impl Metrics {
    // =========================================================================
    // Channel Metrics
    // =========================================================================

    /// Update channel connection state.
    pub fn channel_connected(channel: &str, connected: bool) {
        CHANNEL_CONNECTED
            .with_label_values(&[channel])
            .set(if connected { 1.0 } else { 0.0 });
    }

    /// Record reconnection attempt.
    pub fn channel_reconnect(channel: &str, reason: &str) {
        CHANNEL_RECONNECT_TOTAL
            .with_label_values(&[channel, reason])
            .inc();
    }

    /// Record a frame dropped because it arrived on a superseded link.
    pub fn stale_epoch_discard(channel: &str) {
        INBOUND_DISCARDED_TOTAL
            .with_label_values(&[channel, "stale_epoch"])
            .inc();
    }

    /// Record a frame dropped because its sequence was already applied.
    pub fn duplicate_seq_discard(channel: &str) {
        INBOUND_DISCARDED_TOTAL
            .with_label_values(&[channel, "duplicate_seq"])
            .inc();
    }

    /// Record a detected sequence gap.
    pub fn sequence_gap(channel: &str) {
        INBOUND_DISCARDED_TOTAL
            .with_label_values(&[channel, "sequence_gap"])
            .inc();
    }

    // =========================================================================
    // Store Metrics
    // =========================================================================

    pub fn event_applied(kind: &str) {
        EVENTS_TOTAL.with_label_values(&[kind, "applied"]).inc();
    }

    pub fn event_noop(kind: &str) {
        EVENTS_TOTAL.with_label_values(&[kind, "noop"]).inc();
    }

    pub fn event_deferred(kind: &str) {
        EVENTS_TOTAL.with_label_values(&[kind, "deferred"]).inc();
    }

    /// Record an event that was logged and dropped (unknown order, violation).
    pub fn event_dropped(kind: &str) {
        EVENTS_TOTAL.with_label_values(&[kind, "dropped"]).inc();
    }

    pub fn handoff_overflow() {
        HANDOFF_OVERFLOW_TOTAL.inc();
    }

    pub fn live_orders_set(count: i64) {
        LIVE_ORDERS.set(count);
    }

    // =========================================================================
    // Reconciliation Metrics
    // =========================================================================

    pub fn sweep_completed() {
        SWEEPS_TOTAL.inc();
    }

    /// Add `count` corrections of `kind`. Zero counts are skipped.
    pub fn sweep_corrections(kind: &str, count: usize) {
        if count > 0 {
            SWEEP_CORRECTIONS_TOTAL
                .with_label_values(&[kind])
                .inc_by(count as f64);
        }
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_recorded_metrics() {
        Metrics::channel_connected("ord-test", true);
        Metrics::event_applied("fill");
        Metrics::sweep_corrections("inferred_fills", 2);

        let text = Metrics::render().unwrap();
        assert!(text.contains("xgw_channel_connected"));
        assert!(text.contains("xgw_events_total"));
        assert!(text.contains("xgw_sweep_corrections_total"));
    }

    #[test]
    fn test_sweep_corrections_zero_is_skipped() {
        let before = SWEEP_CORRECTIONS_TOTAL
            .with_label_values(&["zero_probe"])
            .get();
        Metrics::sweep_corrections("zero_probe", 0);
        let after = SWEEP_CORRECTIONS_TOTAL
            .with_label_values(&["zero_probe"])
            .get();
        assert_eq!(before, after);
    }
}
