//! Reconciliation sweep: merge a full server snapshot into local state.
//!
//! Run after every report-channel reconnect, after a detected sequence gap,
//! and optionally on a timer. For every snapshot order the store knows, the
//! sweep synthesizes the events that would have produced the server's view
//! and applies them conclusively. Orders unknown to the store are skipped.

use crate::account::AccountBook;
use crate::store::{ApplyOutcome, OrderStateStore};
use std::sync::Arc;
use tracing::{debug, info, warn};
use xgw_core::{
    Clock, OrderRecord, OrderSnapshot, OrderStatus, Price, Quantity, RejectInfo, ServerSnapshot,
    SnapshotStatus, SystemClock, VenueEvent,
};
use xgw_telemetry::Metrics;

/// Reject code used when the server reports a rejection without details.
pub const SNAPSHOT_REJECT_CODE: i32 = -1;

/// Corrections made by one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub orders_seen: usize,
    pub acks: usize,
    pub rejects: usize,
    pub inferred_fills: usize,
    pub cancels: usize,
    /// Snapshot orders with no local record.
    pub unknown: usize,
    /// Snapshot claims that contradicted local state and were dropped.
    pub conflicts: usize,
    pub positions: usize,
    pub cash: usize,
}

impl SweepReport {
    pub fn total_corrections(&self) -> usize {
        self.acks + self.rejects + self.inferred_fills + self.cancels
    }

    fn record_metrics(&self) {
        Metrics::sweep_completed();
        Metrics::sweep_corrections("acks", self.acks);
        Metrics::sweep_corrections("rejects", self.rejects);
        Metrics::sweep_corrections("inferred_fills", self.inferred_fills);
        Metrics::sweep_corrections("cancels", self.cancels);
        Metrics::sweep_corrections("unknown", self.unknown);
        Metrics::sweep_corrections("conflicts", self.conflicts);
    }
}

/// Merges [`ServerSnapshot`]s into the store and account book.
pub struct ReconciliationSweep<C: Clock = SystemClock> {
    store: Arc<OrderStateStore<C>>,
    account: Arc<AccountBook>,
}

impl<C: Clock> ReconciliationSweep<C> {
    pub fn new(store: Arc<OrderStateStore<C>>, account: Arc<AccountBook>) -> Self {
        Self { store, account }
    }

    pub fn account(&self) -> &Arc<AccountBook> {
        &self.account
    }

    pub fn run(&self, snapshot: &ServerSnapshot) -> SweepReport {
        let mut report = SweepReport::default();

        for snap in &snapshot.orders {
            report.orders_seen += 1;
            self.merge_order(snap, &mut report);
        }

        self.account.sync_positions(&snapshot.positions);
        self.account.sync_cash(&snapshot.cash);
        report.positions = snapshot.positions.len();
        report.cash = snapshot.cash.len();

        info!(
            orders = report.orders_seen,
            corrections = report.total_corrections(),
            inferred_fills = report.inferred_fills,
            unknown = report.unknown,
            conflicts = report.conflicts,
            positions = report.positions,
            "Reconciliation sweep complete"
        );
        report.record_metrics();
        report
    }

    fn merge_order(&self, snap: &OrderSnapshot, report: &mut SweepReport) {
        let Some(local) = self.store.lookup(&snap.order_ref) else {
            if self.store.was_evicted(&snap.order_ref) {
                debug!(order_ref = %snap.order_ref, "Snapshot order already evicted");
            } else {
                warn!(order_ref = %snap.order_ref, status = ?snap.status, "Snapshot order unknown locally, skipped");
                report.unknown += 1;
            }
            return;
        };

        if local.is_terminal() {
            // A canceled order can still absorb a fill that crossed the cancel.
            if local.status.is_canceled() && snap.status == SnapshotStatus::Canceled {
                self.merge_fill(&local, snap, report);
            } else if snap.status.is_terminal() && !local_matches(&local, snap.status) {
                warn!(
                    order_ref = %snap.order_ref,
                    local = %local.status,
                    server = ?snap.status,
                    "Snapshot disagrees with terminal local state, kept local"
                );
                report.conflicts += 1;
            }
            return;
        }

        let order_ref = &snap.order_ref;
        let rejected = matches!(
            snap.status,
            SnapshotStatus::BrokerRejected | SnapshotStatus::VenueRejected
        );

        if !local.status.is_broker_known() && !rejected {
            let ev = VenueEvent::BrokerAck {
                order_ref: order_ref.clone(),
                broker_order_id: snap.broker_order_id.clone().unwrap_or_default(),
            };
            if self.correct(ev, report) {
                report.acks += 1;
            }
        }

        if matches!(
            snap.status,
            SnapshotStatus::Working | SnapshotStatus::Filled | SnapshotStatus::Canceled
        ) && !local.status.is_venue_known()
        {
            let ev = VenueEvent::VenueAck {
                order_ref: order_ref.clone(),
                venue_order_id: snap.venue_order_id.clone().unwrap_or_default(),
            };
            if self.correct(ev, report) {
                report.acks += 1;
            }
        }

        match snap.status {
            SnapshotStatus::BrokerRejected => {
                let ev = VenueEvent::BrokerReject {
                    order_ref: order_ref.clone(),
                    error: snapshot_error(snap),
                };
                if self.correct(ev, report) {
                    report.rejects += 1;
                }
                return;
            }
            SnapshotStatus::VenueRejected => {
                let ev = VenueEvent::VenueReject {
                    order_ref: order_ref.clone(),
                    error: snapshot_error(snap),
                };
                if self.correct(ev, report) {
                    report.rejects += 1;
                }
                return;
            }
            _ => {}
        }

        let Some(local) = self.store.lookup(order_ref) else {
            return;
        };
        self.merge_fill(&local, snap, report);

        if snap.status == SnapshotStatus::Canceled {
            let Some(local) = self.store.lookup(order_ref) else {
                return;
            };
            if local.is_terminal() {
                return;
            }
            let canceled_qty = if snap.canceled_qty.is_positive() {
                snap.canceled_qty
            } else {
                local.requested_qty.saturating_sub(local.filled_qty)
            };
            let ev = VenueEvent::CancelAck {
                order_ref: order_ref.clone(),
                canceled_qty,
            };
            if self.correct(ev, report) {
                report.cancels += 1;
            }
        }
    }

    /// Bring `filled_qty` up to the snapshot's aggregate; never down.
    fn merge_fill(&self, local: &OrderRecord, snap: &OrderSnapshot, report: &mut SweepReport) {
        if snap.filled_qty < local.filled_qty {
            warn!(
                order_ref = %snap.order_ref,
                local = %local.filled_qty,
                server = %snap.filled_qty,
                "Snapshot reports less filled than local, ignored"
            );
            return;
        }
        let delta = snap.filled_qty.saturating_sub(local.filled_qty);
        if !delta.is_positive() {
            return;
        }

        let price = incremental_price(local, snap, delta);
        debug!(
            order_ref = %snap.order_ref,
            delta = %delta,
            price = %price,
            "Inferring fill from snapshot"
        );
        let ev = VenueEvent::Fill {
            order_ref: snap.order_ref.clone(),
            qty: delta,
            price,
            // Stable per aggregate, so repeating a sweep cannot double count.
            trade_id: Some(format!("sweep:{}:{}", snap.order_ref, snap.filled_qty)),
        };
        if self.correct(ev, report) {
            report.inferred_fills += 1;
        }
    }

    /// Apply conclusively. Returns whether the record changed.
    fn correct(&self, event: VenueEvent, report: &mut SweepReport) -> bool {
        match self.store.apply_conclusive(event) {
            Ok(ApplyOutcome::Applied(_)) => true,
            Ok(_) => false,
            Err(e) => {
                warn!(error = %e, "Sweep correction dropped");
                report.conflicts += 1;
                false
            }
        }
    }
}

/// Price of the missing quantity implied by the change of average price.
///
/// Falls back to the snapshot average when the implied price is not positive.
fn incremental_price(local: &OrderRecord, snap: &OrderSnapshot, delta: Quantity) -> Price {
    let implied = (snap.filled_qty.notional(snap.avg_fill_price)
        - local.filled_qty.notional(local.avg_fill_price))
        / delta.inner();
    let price = Price::new(implied);
    if price.is_positive() {
        price
    } else {
        snap.avg_fill_price
    }
}

fn local_matches(local: &OrderRecord, status: SnapshotStatus) -> bool {
    match status {
        SnapshotStatus::Filled => local.status == OrderStatus::Filled,
        SnapshotStatus::Canceled => local.status.is_canceled(),
        SnapshotStatus::BrokerRejected => local.status == OrderStatus::BrokerRejected,
        SnapshotStatus::VenueRejected => local.status == OrderStatus::VenueRejected,
        SnapshotStatus::BrokerAcked | SnapshotStatus::Working => false,
    }
}

fn snapshot_error(snap: &OrderSnapshot) -> RejectInfo {
    snap.error
        .clone()
        .unwrap_or_else(|| RejectInfo::new(SNAPSHOT_REJECT_CODE, "rejected per server snapshot"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::handoff::SnapshotHandoff;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU64, Ordering};
    use xgw_core::{
        CashSnapshot, ChannelHandle, ClientSeqSource, OrderKind, OrderRef, OrderRequest,
        OrderSide, PositionSnapshot,
    };

    struct Seq(AtomicU64);

    impl ClientSeqSource for Seq {
        fn handle(&self) -> ChannelHandle {
            ChannelHandle(0)
        }
        fn tag(&self) -> &str {
            "ord"
        }
        fn next_client_seq(&self) -> u64 {
            self.0.fetch_add(1, Ordering::SeqCst) + 1
        }
    }

    fn setup() -> (Arc<OrderStateStore>, ReconciliationSweep, Seq) {
        let store = Arc::new(OrderStateStore::new(
            StoreConfig::default(),
            Arc::new(SnapshotHandoff::new(256)),
        ));
        let sweep = ReconciliationSweep::new(store.clone(), Arc::new(AccountBook::new()));
        (store, sweep, Seq(AtomicU64::new(0)))
    }

    fn buy(qty: rust_decimal::Decimal) -> OrderRequest {
        OrderRequest {
            side: OrderSide::Buy,
            instrument: "600000".to_string(),
            qty: Quantity::new(qty),
            price: Price::new(dec!(10)),
            order_kind: OrderKind::Limit,
        }
    }

    fn snap(
        order_ref: &OrderRef,
        status: SnapshotStatus,
        filled: rust_decimal::Decimal,
        avg: rust_decimal::Decimal,
    ) -> OrderSnapshot {
        OrderSnapshot {
            order_ref: order_ref.clone(),
            status,
            broker_order_id: Some("B1".to_string()),
            venue_order_id: Some("V1".to_string()),
            filled_qty: Quantity::new(filled),
            avg_fill_price: Price::new(avg),
            canceled_qty: Quantity::ZERO,
            error: None,
        }
    }

    fn server(orders: Vec<OrderSnapshot>) -> ServerSnapshot {
        ServerSnapshot {
            orders,
            ..ServerSnapshot::default()
        }
    }

    #[test]
    fn test_sweep_fills_without_explicit_fill_event() {
        let (store, sweep, seq) = setup();
        let r = store.create(&seq, &buy(dec!(100))).unwrap();
        store.mark_submitted(&r).unwrap();

        let report = sweep.run(&server(vec![snap(
            &r,
            SnapshotStatus::Filled,
            dec!(100),
            dec!(10.2),
        )]));

        let rec = store.lookup(&r).unwrap();
        assert_eq!(rec.status, OrderStatus::Filled);
        assert_eq!(rec.filled_qty, Quantity::new(dec!(100)));
        assert_eq!(rec.avg_fill_price, Price::new(dec!(10.2)));
        assert_eq!(rec.broker_order_id.as_deref(), Some("B1"));
        assert_eq!(report.inferred_fills, 1);
        assert_eq!(report.acks, 2);
    }

    #[test]
    fn test_inferred_fill_uses_incremental_price() {
        let (store, sweep, seq) = setup();
        let r = store.create(&seq, &buy(dec!(100))).unwrap();
        store.apply_broker_ack(&r, "B1").unwrap();
        store.apply_venue_ack(&r, "V1").unwrap();
        store
            .apply_fill(&r, Quantity::new(dec!(40)), Price::new(dec!(10)), None)
            .unwrap();

        // 40 @ 10 locally, server says 100 @ 13 => missing 60 @ 15.
        sweep.run(&server(vec![snap(
            &r,
            SnapshotStatus::Filled,
            dec!(100),
            dec!(13),
        )]));
        let rec = store.lookup(&r).unwrap();
        assert_eq!(rec.status, OrderStatus::Filled);
        assert_eq!(rec.last_fill_qty, Quantity::new(dec!(60)));
        assert_eq!(rec.last_fill_price, Price::new(dec!(15)));
        assert_eq!(rec.avg_fill_price, Price::new(dec!(13)));
    }

    #[test]
    fn test_repeated_sweep_is_idempotent() {
        let (store, sweep, seq) = setup();
        let r = store.create(&seq, &buy(dec!(100))).unwrap();
        let s = server(vec![snap(&r, SnapshotStatus::Working, dec!(30), dec!(10))]);

        let first = sweep.run(&s);
        let second = sweep.run(&s);
        assert_eq!(first.inferred_fills, 1);
        assert_eq!(second.total_corrections(), 0);
        assert_eq!(
            store.lookup(&r).unwrap().filled_qty,
            Quantity::new(dec!(30))
        );
    }

    #[test]
    fn test_snapshot_never_decreases_filled() {
        let (store, sweep, seq) = setup();
        let r = store.create(&seq, &buy(dec!(100))).unwrap();
        store
            .apply_fill(&r, Quantity::new(dec!(50)), Price::new(dec!(10)), None)
            .unwrap();
        sweep.run(&server(vec![snap(
            &r,
            SnapshotStatus::Working,
            dec!(20),
            dec!(10),
        )]));
        assert_eq!(
            store.lookup(&r).unwrap().filled_qty,
            Quantity::new(dec!(50))
        );
    }

    #[test]
    fn test_snapshot_cancel_wins_over_local_working() {
        let (store, sweep, seq) = setup();
        let r = store.create(&seq, &buy(dec!(100))).unwrap();
        store.apply_broker_ack(&r, "B1").unwrap();
        store.apply_venue_ack(&r, "V1").unwrap();

        let report = sweep.run(&server(vec![snap(
            &r,
            SnapshotStatus::Canceled,
            dec!(25),
            dec!(10),
        )]));
        let rec = store.lookup(&r).unwrap();
        assert_eq!(rec.status, OrderStatus::PartiallyCanceled);
        assert_eq!(rec.filled_qty, Quantity::new(dec!(25)));
        assert_eq!(rec.canceled_qty, Quantity::new(dec!(75)));
        assert_eq!(report.cancels, 1);
    }

    #[test]
    fn test_snapshot_reject_wins_over_local_ack() {
        let (store, sweep, seq) = setup();
        let r = store.create(&seq, &buy(dec!(100))).unwrap();
        store.apply_broker_ack(&r, "B1").unwrap();

        let mut s = snap(&r, SnapshotStatus::BrokerRejected, dec!(0), dec!(0));
        s.error = Some(RejectInfo::new(12, "limit exceeded"));
        sweep.run(&server(vec![s]));

        let rec = store.lookup(&r).unwrap();
        assert_eq!(rec.status, OrderStatus::BrokerRejected);
        assert_eq!(rec.error_code, Some(12));
    }

    #[test]
    fn test_unknown_snapshot_orders_are_skipped() {
        let (store, sweep, _) = setup();
        let ghost = OrderRef::new("ord", 77);
        let report = sweep.run(&server(vec![snap(
            &ghost,
            SnapshotStatus::Filled,
            dec!(5),
            dec!(1),
        )]));
        assert_eq!(report.unknown, 1);
        assert!(store.lookup(&ghost).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_account_book_replaced() {
        let (_, sweep, _) = setup();
        let s = ServerSnapshot {
            orders: vec![],
            positions: vec![PositionSnapshot {
                instrument: "600000".to_string(),
                side: OrderSide::Buy,
                qty: Quantity::new(dec!(100)),
                avg_price: Price::new(dec!(10)),
            }],
            cash: vec![CashSnapshot {
                currency: "CNY".to_string(),
                balance: dec!(5000),
                available: dec!(4000),
            }],
        };
        let report = sweep.run(&s);
        assert_eq!(report.positions, 1);
        assert_eq!(sweep.account().positions().len(), 1);

        sweep.run(&ServerSnapshot::default());
        assert!(sweep.account().positions().is_empty());
        assert!(sweep.account().cash().is_empty());
    }
}
