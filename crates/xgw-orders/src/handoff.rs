//! Snapshot handoff from the apply path to the publisher.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::warn;
use xgw_core::OrderRecord;
use xgw_queue::EventHandoffQueue;
use xgw_telemetry::Metrics;

/// Ring buffer plus an unbounded overflow deque.
///
/// Producers never block and never lose a snapshot: when the ring is full
/// the record spills into the overflow deque, and every later record follows
/// it there until the overflow has drained. Ring entries are therefore always
/// older than overflow entries, and draining the ring first keeps the whole
/// handoff FIFO for a single consumer.
#[derive(Debug)]
pub struct SnapshotHandoff {
    ring: EventHandoffQueue<OrderRecord>,
    overflow: Mutex<VecDeque<OrderRecord>>,
}

impl SnapshotHandoff {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: EventHandoffQueue::with_capacity(capacity),
            overflow: Mutex::new(VecDeque::new()),
        }
    }

    pub fn publish(&self, record: OrderRecord) {
        let mut overflow = self.overflow.lock();
        if overflow.is_empty() {
            match self.ring.push(record) {
                Ok(()) => return,
                Err(record) => {
                    warn!(
                        capacity = self.ring.capacity(),
                        "Handoff ring full, spilling to overflow"
                    );
                    overflow.push_back(record);
                }
            }
        } else {
            overflow.push_back(record);
        }
        Metrics::handoff_overflow();
    }

    /// Next snapshot to publish: ring first, then overflow.
    pub fn take(&self) -> Option<OrderRecord> {
        self.ring
            .pop()
            .or_else(|| self.overflow.lock().pop_front())
    }

    /// Advisory count of snapshots waiting.
    pub fn pending(&self) -> usize {
        self.ring.len() + self.overflow.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use xgw_core::{ChannelHandle, OrderKind, OrderRef, OrderRequest, OrderSide, Price, Quantity};

    fn rec(seq: u64) -> OrderRecord {
        let req = OrderRequest {
            side: OrderSide::Buy,
            instrument: "X".to_string(),
            qty: Quantity::new(dec!(1)),
            price: Price::new(dec!(1)),
            order_kind: OrderKind::Limit,
        };
        OrderRecord::new(OrderRef::new("h", seq), seq, ChannelHandle(0), &req, 0)
    }

    #[test]
    fn test_overflow_keeps_everything() {
        let handoff = SnapshotHandoff::new(2);
        for seq in 1..=5 {
            handoff.publish(rec(seq));
        }
        assert_eq!(handoff.pending(), 5);

        let seqs: Vec<u64> = std::iter::from_fn(|| handoff.take())
            .map(|r| r.client_seq)
            .collect();
        // Ring drains first, then overflow in arrival order.
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert!(handoff.take().is_none());
    }

    #[test]
    fn test_publish_after_spill_queues_behind_overflow() {
        let handoff = SnapshotHandoff::new(2);
        for seq in 1..=3 {
            handoff.publish(rec(seq));
        }
        assert_eq!(handoff.take().map(|r| r.client_seq), Some(1));

        // The ring has a free slot again, but 3 is still in the overflow.
        handoff.publish(rec(4));
        let seqs: Vec<u64> = std::iter::from_fn(|| handoff.take())
            .map(|r| r.client_seq)
            .collect();
        assert_eq!(seqs, vec![2, 3, 4]);

        // Once drained, publishes use the ring again.
        handoff.publish(rec(5));
        assert_eq!(handoff.overflow.lock().len(), 0);
        assert_eq!(handoff.take().map(|r| r.client_seq), Some(5));
    }

    #[test]
    fn test_versions_of_one_order_arrive_in_order() {
        let handoff = SnapshotHandoff::new(2);
        let mut record = rec(1);
        for version in 0..3 {
            record.version = version;
            handoff.publish(record.clone());
        }
        let mut delivered = vec![handoff.take().unwrap().version];
        record.version = 3;
        handoff.publish(record);
        delivered.extend(std::iter::from_fn(|| handoff.take()).map(|r| r.version));
        assert_eq!(delivered, vec![0, 1, 2, 3]);
    }
}
