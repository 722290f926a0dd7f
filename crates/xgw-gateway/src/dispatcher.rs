//! Routes session traffic into the order store and reconciliation sweep.

use std::sync::Arc;
use tracing::{debug, info, warn};
use xgw_core::{ChannelHandle, ServerSnapshot, VenueEvent, WireRequest};
use xgw_orders::{ApplyOutcome, OrderStateStore, ReconciliationSweep};
use xgw_session::EventSink;

pub struct Dispatcher {
    store: Arc<OrderStateStore>,
    sweep: Arc<ReconciliationSweep>,
}

impl Dispatcher {
    pub fn new(store: Arc<OrderStateStore>, sweep: Arc<ReconciliationSweep>) -> Self {
        Self { store, sweep }
    }
}

impl EventSink for Dispatcher {
    fn on_event(&self, channel: ChannelHandle, event: VenueEvent) {
        let kind = event.kind();
        // Failures are logged and counted by the store.
        if let Ok(outcome) = self.store.apply(event) {
            if outcome == ApplyOutcome::Deferred {
                debug!(%channel, kind, "Event held for reordering");
            }
        }
    }

    fn on_snapshot(&self, channel: ChannelHandle, snapshot: ServerSnapshot) {
        let report = self.sweep.run(&snapshot);
        info!(
            %channel,
            orders = report.orders_seen,
            corrections = report.total_corrections(),
            inferred_fills = report.inferred_fills,
            unknown = report.unknown,
            conflicts = report.conflicts,
            "Reconciliation sweep applied"
        );
    }

    fn on_replayed(&self, channel: ChannelHandle, request: &WireRequest) {
        if let WireRequest::NewOrder { order_ref, .. } = request {
            if let Err(e) = self.store.mark_submitted(order_ref) {
                warn!(%channel, %order_ref, error = %e, "Replayed order has no live record");
            }
        }
    }

    fn on_connected(&self, channel: ChannelHandle) {
        debug!(%channel, "Channel connected");
    }

    fn on_disconnected(&self, channel: ChannelHandle) {
        debug!(%channel, live_orders = self.store.len(), "Channel disconnected");
    }
}
