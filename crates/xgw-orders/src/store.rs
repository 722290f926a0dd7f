//! Authoritative order state store.
//!
//! One [`OrderRecord`] per order reference, held in a sharded map so that
//! events for different orders apply in parallel while events for one order
//! serialize on its shard lock. Every observable transition publishes a
//! full record snapshot to the [`SnapshotHandoff`] while the shard lock is
//! still held, so snapshots of one order enter the handoff in transition
//! order.

use crate::config::StoreConfig;
use crate::error::{CancelError, StoreError, StoreResult};
use crate::handoff::SnapshotHandoff;
use crate::transition::{self, Mode, Step, Violation};
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, warn};
use xgw_core::{
    ClientSeqSource, Clock, OrderRecord, OrderRef, OrderRequest, OrderStatus, Price, Quantity,
    RejectInfo, SystemClock, VenueEvent,
};
use xgw_telemetry::Metrics;

/// Outcome of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The record changed; carries the resulting snapshot.
    Applied(OrderRecord),
    /// Duplicate or already reflected.
    NoOp,
    /// Held until its predecessor arrives or the reorder window expires.
    Deferred,
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

#[derive(Debug)]
struct DeferredEvent {
    event: VenueEvent,
    deadline_ms: u64,
}

#[derive(Debug)]
struct OrderSlot {
    record: OrderRecord,
    deferred: Vec<DeferredEvent>,
    trade_ids: HashSet<String>,
}

/// Bounded FIFO memory of evicted order refs.
#[derive(Debug, Default)]
struct EvictedRefs {
    order: VecDeque<OrderRef>,
    set: HashSet<OrderRef>,
}

impl EvictedRefs {
    fn remember(&mut self, order_ref: OrderRef, limit: usize) {
        if limit == 0 {
            return;
        }
        while self.order.len() >= limit {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        self.set.insert(order_ref.clone());
        self.order.push_back(order_ref);
    }

    fn contains(&self, order_ref: &OrderRef) -> bool {
        self.set.contains(order_ref)
    }
}

/// Map order-ref to record; the order lifecycle state machine.
pub struct OrderStateStore<C: Clock = SystemClock> {
    orders: DashMap<OrderRef, OrderSlot>,
    evicted: Mutex<EvictedRefs>,
    handoff: Arc<SnapshotHandoff>,
    config: StoreConfig,
    clock: C,
}

impl OrderStateStore<SystemClock> {
    pub fn new(config: StoreConfig, handoff: Arc<SnapshotHandoff>) -> Self {
        Self::with_clock(config, handoff, SystemClock)
    }
}

impl<C: Clock> OrderStateStore<C> {
    pub fn with_clock(config: StoreConfig, handoff: Arc<SnapshotHandoff>, clock: C) -> Self {
        Self {
            orders: DashMap::new(),
            evicted: Mutex::new(EvictedRefs::default()),
            handoff,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    // =========================================================================
    // Request path
    // =========================================================================

    /// Allocate a client sequence from `channel` and insert a `Created` record.
    ///
    /// Returns before anything is sent.
    pub fn create(
        &self,
        channel: &dyn ClientSeqSource,
        request: &OrderRequest,
    ) -> StoreResult<OrderRef> {
        let client_seq = channel.next_client_seq();
        let order_ref = OrderRef::new(channel.tag(), client_seq);
        let now = self.clock.now_ms();

        match self.orders.entry(order_ref.clone()) {
            Entry::Occupied(_) => {
                error!(order_ref = %order_ref, "Order reference collision");
                Err(StoreError::DuplicateOrder(order_ref))
            }
            Entry::Vacant(vacant) => {
                let record =
                    OrderRecord::new(order_ref.clone(), client_seq, channel.handle(), request, now);
                debug!(
                    order_ref = %order_ref,
                    instrument = %record.instrument,
                    side = %record.side,
                    qty = %record.requested_qty,
                    price = %record.requested_price,
                    "Order created"
                );
                let slot = vacant.insert(OrderSlot {
                    record,
                    deferred: Vec::new(),
                    trade_ids: HashSet::new(),
                });
                self.handoff.publish(slot.record.clone());
                drop(slot);
                Metrics::live_orders_set(self.orders.len() as i64);
                Ok(order_ref)
            }
        }
    }

    /// `Created -> Submitted` once the request crossed the send boundary.
    ///
    /// No-op when an acknowledgement already moved the order further.
    pub fn mark_submitted(&self, order_ref: &OrderRef) -> StoreResult<ApplyOutcome> {
        let now = self.clock.now_ms();
        let mut slot = self.slot_mut(order_ref, "submitted")?;
        if slot.record.status != OrderStatus::Created {
            return Ok(ApplyOutcome::NoOp);
        }
        slot.record.status = OrderStatus::Submitted;
        slot.record.touch(now);
        self.handoff.publish(slot.record.clone());
        debug!(order_ref = %order_ref, "Order submitted");
        Ok(ApplyOutcome::Applied(slot.record.clone()))
    }

    /// Set the cancel-pending overlay on a live order.
    pub fn mark_cancel_pending(&self, order_ref: &OrderRef) -> Result<OrderRecord, CancelError> {
        let now = self.clock.now_ms();
        let mut slot = self
            .orders
            .get_mut(order_ref)
            .ok_or_else(|| CancelError::NotFound(order_ref.clone()))?;
        let status = slot.record.status;
        if status.is_terminal() {
            return Err(CancelError::AlreadyTerminal {
                order_ref: order_ref.clone(),
                status,
            });
        }
        if !slot.record.cancel_pending {
            slot.record.cancel_pending = true;
            slot.record.touch(now);
            self.handoff.publish(slot.record.clone());
            debug!(order_ref = %order_ref, %status, "Cancel pending");
        }
        Ok(slot.record.clone())
    }

    // =========================================================================
    // Event path
    // =========================================================================

    pub fn apply_broker_ack(
        &self,
        order_ref: &OrderRef,
        broker_order_id: &str,
    ) -> StoreResult<ApplyOutcome> {
        self.apply(VenueEvent::BrokerAck {
            order_ref: order_ref.clone(),
            broker_order_id: broker_order_id.to_string(),
        })
    }

    pub fn apply_broker_reject(
        &self,
        order_ref: &OrderRef,
        error: RejectInfo,
    ) -> StoreResult<ApplyOutcome> {
        self.apply(VenueEvent::BrokerReject {
            order_ref: order_ref.clone(),
            error,
        })
    }

    pub fn apply_venue_ack(
        &self,
        order_ref: &OrderRef,
        venue_order_id: &str,
    ) -> StoreResult<ApplyOutcome> {
        self.apply(VenueEvent::VenueAck {
            order_ref: order_ref.clone(),
            venue_order_id: venue_order_id.to_string(),
        })
    }

    pub fn apply_venue_reject(
        &self,
        order_ref: &OrderRef,
        error: RejectInfo,
    ) -> StoreResult<ApplyOutcome> {
        self.apply(VenueEvent::VenueReject {
            order_ref: order_ref.clone(),
            error,
        })
    }

    pub fn apply_fill(
        &self,
        order_ref: &OrderRef,
        qty: Quantity,
        price: Price,
        trade_id: Option<String>,
    ) -> StoreResult<ApplyOutcome> {
        self.apply(VenueEvent::Fill {
            order_ref: order_ref.clone(),
            qty,
            price,
            trade_id,
        })
    }

    pub fn apply_cancel_ack(
        &self,
        order_ref: &OrderRef,
        canceled_qty: Quantity,
    ) -> StoreResult<ApplyOutcome> {
        self.apply(VenueEvent::CancelAck {
            order_ref: order_ref.clone(),
            canceled_qty,
        })
    }

    pub fn apply_cancel_reject(
        &self,
        order_ref: &OrderRef,
        error: RejectInfo,
    ) -> StoreResult<ApplyOutcome> {
        self.apply(VenueEvent::CancelReject {
            order_ref: order_ref.clone(),
            error,
        })
    }

    /// Apply a live event, deferring it if its predecessor is missing.
    pub fn apply(&self, event: VenueEvent) -> StoreResult<ApplyOutcome> {
        self.apply_with(event, Mode::Normal)
    }

    /// Apply an event as conclusive evidence, bypassing the reorder window.
    pub fn apply_conclusive(&self, event: VenueEvent) -> StoreResult<ApplyOutcome> {
        self.apply_with(event, Mode::Conclusive)
    }

    fn apply_with(&self, event: VenueEvent, mode: Mode) -> StoreResult<ApplyOutcome> {
        let kind = event.kind();
        let now = self.clock.now_ms();
        let mut guard = self.slot_mut(event.order_ref(), kind)?;
        let slot = &mut *guard;
        let mut forced = false;

        loop {
            match transition::apply(&mut slot.record, &mut slot.trade_ids, &event, mode) {
                Ok(Step::Applied) => {
                    self.commit(&mut slot.record, kind, now);
                    self.reevaluate(slot, now);
                    return Ok(ApplyOutcome::Applied(slot.record.clone()));
                }
                Ok(Step::NoOp) => {
                    debug!(
                        order_ref = %slot.record.order_ref,
                        kind,
                        status = %slot.record.status,
                        "Duplicate event ignored"
                    );
                    Metrics::event_noop(kind);
                    return Ok(ApplyOutcome::NoOp);
                }
                Ok(Step::Defer)
                    if !forced
                        && !slot.deferred.is_empty()
                        && slot.deferred.len() >= self.config.reorder_max_events =>
                {
                    // Make room by treating the oldest held event as expired,
                    // then re-evaluate this event against the new state.
                    let oldest = slot.deferred.remove(0);
                    warn!(
                        order_ref = %slot.record.order_ref,
                        kind = oldest.event.kind(),
                        "Reorder buffer full, forcing oldest deferred event"
                    );
                    self.apply_held(slot, &oldest.event, Mode::Conclusive, now);
                    self.reevaluate(slot, now);
                    forced = true;
                }
                Ok(Step::Defer) => {
                    debug!(
                        order_ref = %slot.record.order_ref,
                        kind,
                        status = %slot.record.status,
                        window_ms = self.config.reorder_window_ms,
                        "Event deferred"
                    );
                    slot.deferred.push(DeferredEvent {
                        event,
                        deadline_ms: now + self.config.reorder_window_ms,
                    });
                    Metrics::event_deferred(kind);
                    return Ok(ApplyOutcome::Deferred);
                }
                Err(violation) => return Err(self.reject_event(&slot.record, kind, violation)),
            }
        }
    }

    /// Look up a live slot for mutation, classifying misses.
    fn slot_mut(
        &self,
        order_ref: &OrderRef,
        kind: &'static str,
    ) -> StoreResult<RefMut<'_, OrderRef, OrderSlot>> {
        if let Some(slot) = self.orders.get_mut(order_ref) {
            return Ok(slot);
        }
        Metrics::event_dropped(kind);
        if self.evicted.lock().contains(order_ref) {
            debug!(order_ref = %order_ref, kind, "Event for evicted order dropped");
            Err(StoreError::EvictedOrder(order_ref.clone()))
        } else {
            warn!(order_ref = %order_ref, kind, "Event for unknown order dropped");
            Err(StoreError::UnknownOrder(order_ref.clone()))
        }
    }

    fn commit(&self, record: &mut OrderRecord, kind: &'static str, now: u64) {
        record.touch(now);
        debug!(
            order_ref = %record.order_ref,
            kind,
            status = %record.status,
            filled = %record.filled_qty,
            canceled = %record.canceled_qty,
            version = record.version,
            "Order transition"
        );
        self.handoff.publish(record.clone());
        Metrics::event_applied(kind);
    }

    fn reject_event(&self, record: &OrderRecord, kind: &'static str, v: Violation) -> StoreError {
        Metrics::event_dropped(kind);
        let order_ref = record.order_ref.clone();
        match v {
            Violation::Protocol(reason) => {
                error!(order_ref = %order_ref, kind, status = %record.status, %reason, "Protocol violation, event dropped");
                StoreError::ProtocolViolation { order_ref, reason }
            }
            Violation::InvalidFill(reason) => {
                error!(order_ref = %order_ref, kind, status = %record.status, %reason, "Invalid fill, event dropped");
                StoreError::InvalidFill { order_ref, reason }
            }
        }
    }

    /// Apply a previously held event. Returns whether the record changed;
    /// `None` when the event must stay held.
    fn apply_held(
        &self,
        slot: &mut OrderSlot,
        event: &VenueEvent,
        mode: Mode,
        now: u64,
    ) -> Option<bool> {
        let kind = event.kind();
        match transition::apply(&mut slot.record, &mut slot.trade_ids, event, mode) {
            Ok(Step::Applied) => {
                self.commit(&mut slot.record, kind, now);
                Some(true)
            }
            Ok(Step::NoOp) => {
                Metrics::event_noop(kind);
                Some(false)
            }
            Ok(Step::Defer) => None,
            Err(v) => {
                let _ = self.reject_event(&slot.record, kind, v);
                Some(false)
            }
        }
    }

    /// Retry held events until none of them makes progress.
    fn reevaluate(&self, slot: &mut OrderSlot, now: u64) {
        loop {
            if slot.deferred.is_empty() {
                return;
            }
            let held = std::mem::take(&mut slot.deferred);
            let mut progressed = false;
            for deferred in held {
                match self.apply_held(slot, &deferred.event, Mode::Normal, now) {
                    Some(changed) => progressed |= changed,
                    None => slot.deferred.push(deferred),
                }
            }
            if !progressed {
                return;
            }
        }
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Apply every deferred event whose window elapsed as conclusive evidence.
    ///
    /// Returns the number of events expired.
    pub fn expire_deferred(&self) -> usize {
        let now = self.clock.now_ms();
        let mut expired_total = 0;

        for mut entry in self.orders.iter_mut() {
            let slot = entry.value_mut();
            if !slot.deferred.iter().any(|d| d.deadline_ms <= now) {
                continue;
            }
            let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut slot.deferred)
                .into_iter()
                .partition(|d| d.deadline_ms <= now);
            slot.deferred = kept;

            for deferred in expired {
                expired_total += 1;
                debug!(
                    order_ref = %slot.record.order_ref,
                    kind = deferred.event.kind(),
                    "Reorder window expired, applying conclusively"
                );
                self.apply_held(slot, &deferred.event, Mode::Conclusive, now);
            }
            self.reevaluate(slot, now);
        }

        expired_total
    }

    /// Remove terminal records with no held events that have been idle for
    /// at least `linger_ms`. Returns the removed records for journaling.
    pub fn evict_terminal(&self, linger_ms: u64) -> Vec<OrderRecord> {
        let now = self.clock.now_ms();
        let evictable = |slot: &OrderSlot| {
            slot.record.is_terminal()
                && slot.deferred.is_empty()
                && now.saturating_sub(slot.record.last_update_time) >= linger_ms
        };

        let candidates: Vec<OrderRef> = self
            .orders
            .iter()
            .filter(|e| evictable(e.value()))
            .map(|e| e.key().clone())
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let mut removed = Vec::with_capacity(candidates.len());
        for order_ref in candidates {
            if let Some((order_ref, slot)) = self.orders.remove_if(&order_ref, |_, s| evictable(s)) {
                self.evicted
                    .lock()
                    .remember(order_ref, self.config.evicted_memory);
                removed.push(slot.record);
            }
        }
        removed.sort_by_key(|r| (r.channel, r.client_seq));

        debug!(count = removed.len(), live = self.orders.len(), "Evicted terminal orders");
        Metrics::live_orders_set(self.orders.len() as i64);
        removed
    }

    /// Whether `order_ref` was evicted recently enough to be remembered.
    pub fn was_evicted(&self, order_ref: &OrderRef) -> bool {
        self.evicted.lock().contains(order_ref)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn lookup(&self, order_ref: &OrderRef) -> Option<OrderRecord> {
        self.orders.get(order_ref).map(|s| s.record.clone())
    }

    /// Every live record, ordered by channel then client sequence.
    pub fn snapshot(&self) -> Vec<OrderRecord> {
        let mut records: Vec<OrderRecord> =
            self.orders.iter().map(|e| e.value().record.clone()).collect();
        records.sort_by_key(|r| (r.channel, r.client_seq));
        records
    }

    /// Number of events currently held for `order_ref`.
    pub fn deferred_count(&self, order_ref: &OrderRef) -> usize {
        self.orders
            .get(order_ref)
            .map(|s| s.deferred.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU64, Ordering};
    use xgw_core::{ChannelHandle, ManualClock, OrderKind, OrderSide};

    struct TestChannel {
        seq: AtomicU64,
    }

    impl TestChannel {
        fn new() -> Self {
            Self {
                seq: AtomicU64::new(0),
            }
        }
    }

    impl ClientSeqSource for TestChannel {
        fn handle(&self) -> ChannelHandle {
            ChannelHandle(0)
        }

        fn tag(&self) -> &str {
            "ord"
        }

        fn next_client_seq(&self) -> u64 {
            self.seq.fetch_add(1, Ordering::SeqCst) + 1
        }
    }

    fn setup() -> (
        OrderStateStore<Arc<ManualClock>>,
        Arc<ManualClock>,
        Arc<SnapshotHandoff>,
        TestChannel,
    ) {
        let clock = Arc::new(ManualClock::new(1_000));
        let handoff = Arc::new(SnapshotHandoff::new(1024));
        let store =
            OrderStateStore::with_clock(StoreConfig::default(), handoff.clone(), clock.clone());
        (store, clock, handoff, TestChannel::new())
    }

    fn limit_buy(qty: rust_decimal::Decimal) -> OrderRequest {
        OrderRequest {
            side: OrderSide::Buy,
            instrument: "600000".to_string(),
            qty: Quantity::new(qty),
            price: Price::new(dec!(10)),
            order_kind: OrderKind::Limit,
        }
    }

    fn drain(handoff: &SnapshotHandoff) -> Vec<OrderRecord> {
        std::iter::from_fn(|| handoff.take()).collect()
    }

    #[test]
    fn test_create_assigns_monotonic_refs() {
        let (store, _, _, ch) = setup();
        let a = store.create(&ch, &limit_buy(dec!(1))).unwrap();
        let b = store.create(&ch, &limit_buy(dec!(1))).unwrap();
        assert_eq!(a.as_str(), "ord-000000000001");
        assert_eq!(b.as_str(), "ord-000000000002");
        assert_eq!(store.lookup(&a).unwrap().status, OrderStatus::Created);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_full_fill_lifecycle() {
        let (store, _, handoff, ch) = setup();
        let r = store.create(&ch, &limit_buy(dec!(100))).unwrap();
        store.mark_submitted(&r).unwrap();
        store.apply_broker_ack(&r, "B1").unwrap();
        store.apply_venue_ack(&r, "V1").unwrap();
        store
            .apply_fill(&r, Quantity::new(dec!(40)), Price::new(dec!(10)), None)
            .unwrap();
        store
            .apply_fill(&r, Quantity::new(dec!(60)), Price::new(dec!(10)), None)
            .unwrap();

        let rec = store.lookup(&r).unwrap();
        assert_eq!(rec.status, OrderStatus::Filled);
        assert_eq!(rec.filled_qty, Quantity::new(dec!(100)));
        assert_eq!(rec.broker_order_id.as_deref(), Some("B1"));
        assert_eq!(rec.venue_order_id.as_deref(), Some("V1"));

        let published = drain(&handoff);
        let statuses: Vec<_> = published.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                OrderStatus::Created,
                OrderStatus::Submitted,
                OrderStatus::BrokerAcked,
                OrderStatus::VenueAcked,
                OrderStatus::PartiallyFilled,
                OrderStatus::Filled,
            ]
        );
        let versions: Vec<_> = published.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_duplicate_events_apply_once() {
        let (store, _, handoff, ch) = setup();
        let r = store.create(&ch, &limit_buy(dec!(100))).unwrap();
        store.apply_broker_ack(&r, "B1").unwrap();
        assert_eq!(store.apply_broker_ack(&r, "B1").unwrap(), ApplyOutcome::NoOp);
        store.apply_venue_ack(&r, "V1").unwrap();
        assert_eq!(store.apply_venue_ack(&r, "V1").unwrap(), ApplyOutcome::NoOp);

        let fill = || {
            store.apply_fill(
                &r,
                Quantity::new(dec!(10)),
                Price::new(dec!(10)),
                Some("T-1".to_string()),
            )
        };
        assert!(fill().unwrap().is_applied());
        assert_eq!(fill().unwrap(), ApplyOutcome::NoOp);
        assert_eq!(store.lookup(&r).unwrap().filled_qty, Quantity::new(dec!(10)));
        // Created, BrokerAcked, VenueAcked, PartiallyFilled
        assert_eq!(drain(&handoff).len(), 4);
    }

    fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head.clone());
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn test_any_arrival_order_converges_monotonically() {
        let fill = |r: &OrderRef, qty, trade_id: &str| VenueEvent::Fill {
            order_ref: r.clone(),
            qty: Quantity::new(qty),
            price: Price::new(dec!(10)),
            trade_id: Some(trade_id.to_string()),
        };

        for order in permutations(&[0, 1, 2, 3]) {
            let (store, clock, _, ch) = setup();
            let r = store.create(&ch, &limit_buy(dec!(100))).unwrap();
            store.mark_submitted(&r).unwrap();
            let events = [
                VenueEvent::BrokerAck {
                    order_ref: r.clone(),
                    broker_order_id: "B1".to_string(),
                },
                VenueEvent::VenueAck {
                    order_ref: r.clone(),
                    venue_order_id: "V1".to_string(),
                },
                fill(&r, dec!(40), "T1"),
                fill(&r, dec!(60), "T2"),
            ];

            let mut last = store.lookup(&r).unwrap();
            for &i in &order {
                store.apply(events[i].clone()).unwrap();
                let now = store.lookup(&r).unwrap();
                assert!(now.status.rank() >= last.status.rank(), "{order:?}");
                assert!(now.version >= last.version, "{order:?}");
                assert!(now.filled_qty >= last.filled_qty, "{order:?}");

                // Redelivery never changes the record.
                let outcome = store.apply(events[i].clone()).unwrap();
                assert!(!outcome.is_applied(), "{order:?} event {i}");
                assert_eq!(store.lookup(&r).unwrap(), now, "{order:?} event {i}");
                last = now;
            }

            clock.advance(store.config().reorder_window_ms);
            store.expire_deferred();

            let rec = store.lookup(&r).unwrap();
            assert_eq!(rec.status, OrderStatus::Filled, "{order:?}");
            assert_eq!(rec.filled_qty, Quantity::new(dec!(100)), "{order:?}");
            assert_eq!(rec.broker_order_id.as_deref(), Some("B1"), "{order:?}");
            assert_eq!(rec.venue_order_id.as_deref(), Some("V1"), "{order:?}");
            assert_eq!(store.deferred_count(&r), 0, "{order:?}");
        }
    }

    #[test]
    fn test_venue_ack_before_broker_ack_resolves_on_arrival() {
        let (store, _, _, ch) = setup();
        let r = store.create(&ch, &limit_buy(dec!(100))).unwrap();
        assert_eq!(
            store.apply_venue_ack(&r, "V1").unwrap(),
            ApplyOutcome::Deferred
        );
        assert_eq!(store.deferred_count(&r), 1);

        let out = store.apply_broker_ack(&r, "B1").unwrap();
        match out {
            ApplyOutcome::Applied(rec) => {
                assert_eq!(rec.status, OrderStatus::VenueAcked);
                assert_eq!(rec.venue_order_id.as_deref(), Some("V1"));
            }
            other => panic!("expected applied, got {other:?}"),
        }
        assert_eq!(store.deferred_count(&r), 0);
    }

    #[test]
    fn test_deferred_event_expires_conclusively() {
        let (store, clock, _, ch) = setup();
        let r = store.create(&ch, &limit_buy(dec!(100))).unwrap();
        store.apply_venue_ack(&r, "V1").unwrap();

        clock.advance(100);
        assert_eq!(store.expire_deferred(), 0);
        assert_eq!(store.lookup(&r).unwrap().status, OrderStatus::Created);

        clock.advance(200);
        assert_eq!(store.expire_deferred(), 1);
        let rec = store.lookup(&r).unwrap();
        assert_eq!(rec.status, OrderStatus::VenueAcked);
        assert_eq!(store.deferred_count(&r), 0);

        // The broker ack finally shows up: no regression, id recorded.
        store.apply_broker_ack(&r, "B1").unwrap();
        let rec = store.lookup(&r).unwrap();
        assert_eq!(rec.status, OrderStatus::VenueAcked);
        assert_eq!(rec.broker_order_id.as_deref(), Some("B1"));
    }

    #[test]
    fn test_cancel_with_fill_in_flight() {
        let (store, _, _, ch) = setup();
        let r = store.create(&ch, &limit_buy(dec!(100))).unwrap();
        store.apply_broker_ack(&r, "B1").unwrap();
        store.apply_venue_ack(&r, "V1").unwrap();
        store.mark_cancel_pending(&r).unwrap();

        // Cancel ack overtakes the fill.
        assert_eq!(
            store.apply_cancel_ack(&r, Quantity::new(dec!(70))).unwrap(),
            ApplyOutcome::Deferred
        );
        store
            .apply_fill(&r, Quantity::new(dec!(30)), Price::new(dec!(10)), None)
            .unwrap();

        let rec = store.lookup(&r).unwrap();
        assert_eq!(rec.status, OrderStatus::PartiallyCanceled);
        assert_eq!(rec.filled_qty, Quantity::new(dec!(30)));
        assert_eq!(rec.canceled_qty, Quantity::new(dec!(70)));
        assert!(!rec.cancel_pending);
    }

    #[test]
    fn test_broker_reject_after_progress_leaves_record() {
        let (store, _, _, ch) = setup();
        let r = store.create(&ch, &limit_buy(dec!(100))).unwrap();
        store.apply_broker_ack(&r, "B1").unwrap();
        store.apply_venue_ack(&r, "V1").unwrap();
        let before = store.lookup(&r).unwrap();

        let err = store
            .apply_broker_reject(&r, RejectInfo::new(1, "late"))
            .unwrap_err();
        assert!(matches!(err, StoreError::ProtocolViolation { .. }));
        assert_eq!(store.lookup(&r).unwrap(), before);
    }

    #[test]
    fn test_duplicate_broker_reject_is_noop() {
        let (store, _, _, ch) = setup();
        let r = store.create(&ch, &limit_buy(dec!(100))).unwrap();
        store
            .apply_broker_reject(&r, RejectInfo::new(5, "no funds"))
            .unwrap();
        assert_eq!(
            store
                .apply_broker_reject(&r, RejectInfo::new(5, "no funds"))
                .unwrap(),
            ApplyOutcome::NoOp
        );
        let rec = store.lookup(&r).unwrap();
        assert_eq!(rec.status, OrderStatus::BrokerRejected);
        assert_eq!(rec.error_code, Some(5));
    }

    #[test]
    fn test_unknown_order_is_never_fabricated() {
        let (store, _, _, _) = setup();
        let ghost = OrderRef::new("ord", 999);
        let err = store.apply_broker_ack(&ghost, "B").unwrap_err();
        assert!(matches!(err, StoreError::UnknownOrder(_)));
        assert!(store.lookup(&ghost).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_mark_cancel_pending_errors() {
        let (store, _, _, ch) = setup();
        let missing = OrderRef::new("ord", 42);
        assert_eq!(
            store.mark_cancel_pending(&missing).unwrap_err(),
            CancelError::NotFound(missing)
        );

        let r = store.create(&ch, &limit_buy(dec!(1))).unwrap();
        store
            .apply_fill(&r, Quantity::new(dec!(1)), Price::new(dec!(10)), None)
            .unwrap();
        assert!(matches!(
            store.mark_cancel_pending(&r),
            Err(CancelError::AlreadyTerminal {
                status: OrderStatus::Filled,
                ..
            })
        ));
    }

    #[test]
    fn test_reorder_buffer_bound_forces_oldest() {
        let config = StoreConfig {
            reorder_max_events: 1,
            ..StoreConfig::default()
        };
        let store = OrderStateStore::with_clock(
            config,
            Arc::new(SnapshotHandoff::new(64)),
            Arc::new(ManualClock::new(0)),
        );
        let ch = TestChannel::new();
        let r = store.create(&ch, &limit_buy(dec!(100))).unwrap();
        store.apply_venue_ack(&r, "V1").unwrap();

        // A second deferral pushes the held venue ack through conclusively;
        // the partial cancel ack still waits for fills.
        assert_eq!(
            store.apply_cancel_ack(&r, Quantity::new(dec!(40))).unwrap(),
            ApplyOutcome::Deferred
        );
        assert_eq!(store.lookup(&r).unwrap().status, OrderStatus::VenueAcked);
        assert_eq!(store.deferred_count(&r), 1);
    }

    #[test]
    fn test_evict_terminal_after_linger() {
        let (store, clock, _, ch) = setup();
        let done = store.create(&ch, &limit_buy(dec!(1))).unwrap();
        let live = store.create(&ch, &limit_buy(dec!(1))).unwrap();
        store
            .apply_fill(&done, Quantity::new(dec!(1)), Price::new(dec!(10)), None)
            .unwrap();

        assert!(store.evict_terminal(5_000).is_empty());
        clock.advance(5_000);
        let evicted = store.evict_terminal(5_000);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].order_ref, done);
        assert!(store.lookup(&done).is_none());
        assert!(store.lookup(&live).is_some());
        assert!(store.was_evicted(&done));

        let err = store.apply_broker_ack(&done, "B").unwrap_err();
        assert!(matches!(err, StoreError::EvictedOrder(_)));
    }

    #[test]
    fn test_late_event_on_rejected_order_does_not_block_eviction() {
        let (store, clock, _, ch) = setup();
        let r = store.create(&ch, &limit_buy(dec!(10))).unwrap();
        store
            .apply_broker_reject(&r, RejectInfo::new(1, "x"))
            .unwrap();
        // Venue ack arriving for a rejected order is a no-op, nothing held.
        store.apply_venue_ack(&r, "V").unwrap();
        clock.advance(10_000);
        assert_eq!(store.evict_terminal(0).len(), 1);
    }

    #[test]
    fn test_concurrent_fills_on_distinct_orders() {
        let (store, _, _, ch) = setup();
        let store = Arc::new(store);
        let refs: Vec<_> = (0..8)
            .map(|_| store.create(&ch, &limit_buy(dec!(1000))).unwrap())
            .collect();

        let handles: Vec<_> = refs
            .iter()
            .cloned()
            .map(|r| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        store
                            .apply_fill(
                                &r,
                                Quantity::new(dec!(10)),
                                Price::new(dec!(10)),
                                Some(format!("T{i}")),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for r in &refs {
            let rec = store.lookup(r).unwrap();
            assert_eq!(rec.status, OrderStatus::Filled);
            assert_eq!(rec.filled_qty, Quantity::new(dec!(1000)));
        }
    }
}
