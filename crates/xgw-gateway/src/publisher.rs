//! Publisher thread: drains the snapshot handoff into the broadcast feed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info};
use xgw_core::OrderRecord;
use xgw_orders::SnapshotHandoff;

/// Sleep when the handoff is empty.
const IDLE_SLEEP: Duration = Duration::from_micros(200);

pub struct Publisher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl Publisher {
    pub fn spawn(
        handoff: Arc<SnapshotHandoff>,
        updates: broadcast::Sender<OrderRecord>,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("xgw-publisher".to_string())
            .spawn(move || run(&handoff, &updates, &stop_flag))?;
        info!("Publisher thread started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Drain what is left, then join the thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(published) => info!(published, "Publisher thread stopped"),
                Err(_) => error!("Publisher thread panicked"),
            }
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    handoff: &SnapshotHandoff,
    updates: &broadcast::Sender<OrderRecord>,
    stop: &AtomicBool,
) -> u64 {
    let mut published = 0u64;
    loop {
        match handoff.take() {
            Some(record) => {
                // No subscribers is not an error.
                let _ = updates.send(record);
                published += 1;
            }
            None => {
                if stop.load(Ordering::Acquire) && handoff.pending() == 0 {
                    break;
                }
                thread::sleep(IDLE_SLEEP);
            }
        }
    }
    debug!(published, "Publisher drained");
    published
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use xgw_core::{ChannelHandle, OrderKind, OrderRef, OrderRequest, OrderSide, Price, Quantity};

    fn record(seq: u64) -> OrderRecord {
        let req = OrderRequest {
            side: OrderSide::Buy,
            instrument: "IF2412".to_string(),
            qty: Quantity::new(dec!(1)),
            price: Price::new(dec!(1)),
            order_kind: OrderKind::Limit,
        };
        OrderRecord::new(OrderRef::new("ord", seq), seq, ChannelHandle(0), &req, 0)
    }

    #[test]
    fn test_publishes_in_handoff_order_and_drains_on_stop() {
        let handoff = Arc::new(SnapshotHandoff::new(4));
        let (tx, mut rx) = broadcast::channel(64);
        for seq in 1..=10 {
            handoff.publish(record(seq));
        }
        let publisher = Publisher::spawn(Arc::clone(&handoff), tx).unwrap();
        publisher.stop();

        let seqs: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|r| r.client_seq)
            .collect();
        assert_eq!(seqs, (1..=10).collect::<Vec<_>>());
        assert_eq!(handoff.pending(), 0);
    }
}
